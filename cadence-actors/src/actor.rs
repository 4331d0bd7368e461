use anyhow::Result;
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};

/// Minimal actor trait. `Self: Sized` avoids object-safety issues when using `Context<Self>`.
///
/// Messages are handled strictly one at a time, so an actor never has two
/// `handle` calls in flight.
#[async_trait::async_trait]
pub trait Actor: Send + Sized + 'static {
    type Msg: Send + 'static;

    /// Handle a single message. Return `Err` to stop the actor.
    async fn handle(&mut self, msg: Self::Msg, ctx: &mut Context<Self>) -> Result<()>;

    /// Called once after the mailbox loop ends, whatever the reason.
    async fn stopped(&mut self) {}
}

/// Runtime context for an actor instance.
pub struct Context<A: Actor> {
    addr: Addr<A>,
    stop: bool,
}

impl<A: Actor> Context<A> {
    /// Get a clone of this actor's `Addr`.
    pub fn addr(&self) -> Addr<A> {
        self.addr.clone()
    }

    /// Request a graceful stop after processing the current message.
    pub fn stop(&mut self) {
        self.stop = true;
    }
}

/// Address for sending messages to an actor.
pub struct Addr<A: Actor>(mpsc::Sender<A::Msg>);

/// Manual Clone to avoid unnecessary bounds on `A`/`A::Msg`.
impl<A: Actor> Clone for Addr<A> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<A: Actor> Addr<A> {
    /// Async send; awaits backpressure. Returns the message if the receiver is dropped.
    pub async fn send(&self, msg: A::Msg) -> std::result::Result<(), A::Msg> {
        self.0.send(msg).await.map_err(|e| e.0)
    }

    /// Try to send without waiting. Returns the message if the mailbox is full or closed.
    pub fn try_send(&self, msg: A::Msg) -> std::result::Result<(), A::Msg> {
        self.0.try_send(msg).map_err(|e| e.into_inner())
    }

    /// Whether the actor has stopped and dropped its mailbox.
    pub fn is_closed(&self) -> bool {
        self.0.is_closed()
    }

    /// Bounded mailbox capacity.
    pub fn capacity(&self) -> usize {
        self.0.max_capacity()
    }
}

/// Handle to a running actor task.
pub struct ActorHandle<A: Actor> {
    pub addr: Addr<A>,
    pub task: JoinHandle<anyhow::Result<()>>,
}

/// Spawn an actor with a bounded mailbox.
///
/// Stop conditions:
/// - `handle` returns `Err`
/// - all senders are dropped
/// - `ctx.stop()` is called
///
/// ```
/// # use anyhow::Result;
/// # use async_trait::async_trait;
/// # use cadence_actors::actor::{self, Actor, Context};
/// # struct Accumulator(u8);
/// # #[async_trait]
/// # impl Actor for Accumulator {
/// #     type Msg = u8;
/// #     async fn handle(&mut self, msg: Self::Msg, ctx: &mut Context<Self>) -> Result<()> {
/// #         self.0 += msg;
/// #         if self.0 >= 5 {
/// #             ctx.stop();
/// #         }
/// #         Ok(())
/// #     }
/// # }
/// let rt = tokio::runtime::Runtime::new().unwrap();
/// rt.block_on(async {
///     let actor::ActorHandle { addr, task } = actor::spawn_actor(Accumulator(0), 8);
///     assert_eq!(addr.capacity(), 8);
///     addr.send(2).await.unwrap();
///     addr.send(3).await.unwrap();
///     drop(addr);
///     task.await.unwrap().unwrap();
/// });
/// ```
pub fn spawn_actor<A: Actor>(actor: A, capacity: usize) -> ActorHandle<A> {
    spawn_actor_with_shutdown(actor, capacity, None)
}

/// Like [`spawn_actor`], additionally stopping when `shutdown` fires.
///
/// Shutdown is observed between messages: a message already being handled
/// runs to completion (or to its own cancellation checkpoint) first.
pub fn spawn_actor_with_shutdown<A: Actor>(
    actor: A,
    capacity: usize,
    shutdown: Option<broadcast::Receiver<()>>,
) -> ActorHandle<A> {
    let (tx, rx) = mpsc::channel::<A::Msg>(capacity);
    let addr = Addr(tx);
    let ctx = Context {
        addr: addr.clone(),
        stop: false,
    };
    let task = tokio::spawn(run_mailbox(actor, ctx, rx, shutdown));
    ActorHandle { addr, task }
}

async fn run_mailbox<A: Actor>(
    mut actor: A,
    mut ctx: Context<A>,
    mut rx: mpsc::Receiver<A::Msg>,
    mut shutdown: Option<broadcast::Receiver<()>>,
) -> Result<()> {
    let result = loop {
        let next = match shutdown.as_mut() {
            Some(shutdown_rx) => tokio::select! {
                biased;
                _ = shutdown_rx.recv() => None,
                msg = rx.recv() => msg,
            },
            None => rx.recv().await,
        };
        let Some(msg) = next else {
            break Ok(());
        };
        if let Err(e) = actor.handle(msg, &mut ctx).await {
            tracing::error!(
                target = "cadence-actors",
                error = ?e,
                "actor returned error; stopping"
            );
            break Err(e);
        }
        if ctx.stop {
            break Ok(());
        }
    };
    actor.stopped().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counter {
        seen: Arc<AtomicUsize>,
        stops: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl Actor for Counter {
        type Msg = u32;

        async fn handle(&mut self, msg: u32, ctx: &mut Context<Self>) -> Result<()> {
            if msg == 0 {
                anyhow::bail!("zero is not a count");
            }
            self.seen.fetch_add(msg as usize, Ordering::SeqCst);
            if msg == 99 {
                ctx.stop();
            }
            Ok(())
        }

        async fn stopped(&mut self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counter() -> (Counter, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let seen = Arc::new(AtomicUsize::new(0));
        let stops = Arc::new(AtomicUsize::new(0));
        (
            Counter {
                seen: seen.clone(),
                stops: stops.clone(),
            },
            seen,
            stops,
        )
    }

    #[tokio::test]
    async fn error_stops_the_actor() {
        let (actor, seen, stops) = counter();
        let ActorHandle { addr, task } = spawn_actor(actor, 4);
        addr.send(2).await.unwrap();
        addr.send(0).await.unwrap();
        assert!(task.await.unwrap().is_err());
        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
        assert!(addr.is_closed());
    }

    #[tokio::test]
    async fn shutdown_broadcast_ends_the_loop() {
        let (actor, _seen, stops) = counter();
        let (tx, rx) = broadcast::channel(1);
        let ActorHandle { addr, task } = spawn_actor_with_shutdown(actor, 4, Some(rx));
        tx.send(()).unwrap();
        task.await.unwrap().unwrap();
        assert_eq!(stops.load(Ordering::SeqCst), 1);
        drop(addr);
    }

    #[tokio::test]
    async fn ctx_stop_is_graceful() {
        let (actor, seen, _stops) = counter();
        let ActorHandle { addr, task } = spawn_actor(actor, 4);
        addr.send(99).await.unwrap();
        task.await.unwrap().unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 99);
    }
}
