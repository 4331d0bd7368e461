//! Line-based operator console on stdin.
use anyhow::Result;
use cadence_runtime::EngineHandle;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    Force,
    Pause,
    Resume,
    Skip,
    Revert,
    Reset,
    Status,
    Quit,
    Help,
}

impl Command {
    pub fn parse(line: &str) -> Option<Self> {
        Some(match line.trim().to_ascii_lowercase().as_str() {
            "start" => Self::Start,
            "stop" => Self::Stop,
            "force" | "now" => Self::Force,
            "pause" => Self::Pause,
            "resume" => Self::Resume,
            "skip" => Self::Skip,
            "revert" | "undo" => Self::Revert,
            "reset" => Self::Reset,
            "status" | "" => Self::Status,
            "quit" | "exit" => Self::Quit,
            "help" | "?" => Self::Help,
            _ => return None,
        })
    }
}

const HELP: &str =
    "commands: start stop force pause resume skip revert reset status quit";

async fn apply(handle: &EngineHandle, cmd: Command) -> Result<()> {
    match cmd {
        Command::Start => handle.start().await,
        Command::Stop => handle.stop().await,
        Command::Force => handle.force_now().await,
        Command::Pause => handle.pause().await,
        Command::Resume => handle.resume().await,
        Command::Skip => handle.skip_front().await,
        Command::Revert => handle.revert_last().await,
        Command::Reset => handle.reset().await,
        Command::Status | Command::Quit | Command::Help => Ok(()),
    }
}

/// Read commands until `shutdown` fires. `quit` and end of input both end
/// the run, since the engine waits on the console after a stop.
pub async fn run(handle: EngineHandle, shutdown: CancellationToken) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("{HELP}");
    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            shutdown.cancel();
            break;
        };
        let Some(cmd) = Command::parse(&line) else {
            println!("unknown command {:?}; {HELP}", line.trim());
            continue;
        };
        match cmd {
            Command::Quit => {
                shutdown.cancel();
                break;
            }
            Command::Help => println!("{HELP}"),
            _ => match apply(&handle, cmd).await {
                Ok(()) => println!("{}", handle.snapshot().await.line()),
                Err(e) => println!("refused: {e:#}"),
            },
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_parse_loosely() {
        assert_eq!(Command::parse(" Pause \n"), Some(Command::Pause));
        assert_eq!(Command::parse("now"), Some(Command::Force));
        assert_eq!(Command::parse(""), Some(Command::Status));
        assert_eq!(Command::parse("launch"), None);
    }
}
