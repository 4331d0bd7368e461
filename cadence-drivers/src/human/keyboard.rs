//! QWERTY key adjacency used to pick plausible typos.
use rand::seq::SliceRandom;
use rand::Rng;

const ROWS: [&str; 4] = ["1234567890-=", "qwertyuiop[]", "asdfghjkl;'", "zxcvbnm,./"];

fn position(c: char) -> Option<(usize, usize)> {
    let lower = c.to_ascii_lowercase();
    ROWS.iter()
        .enumerate()
        .find_map(|(row, keys)| keys.chars().position(|k| k == lower).map(|col| (row, col)))
}

fn key_at(row: isize, col: isize) -> Option<char> {
    if row < 0 || col < 0 {
        return None;
    }
    ROWS.get(row as usize)
        .and_then(|keys| keys.chars().nth(col as usize))
}

/// Keys physically next to `c` on a staggered QWERTY layout. Letters keep
/// the case of `c`. Empty for characters that are not on the main block.
pub fn neighbours(c: char) -> Vec<char> {
    let Some((row, col)) = position(c) else {
        return Vec::new();
    };
    let (row, col) = (row as isize, col as isize);
    let offsets = [(0, -1), (0, 1), (-1, 0), (-1, 1), (1, -1), (1, 0)];
    offsets
        .iter()
        .filter_map(|(dr, dc)| key_at(row + dr, col + dc))
        .map(|k| {
            if c.is_ascii_uppercase() {
                k.to_ascii_uppercase()
            } else {
                k
            }
        })
        .collect()
}

pub fn random_neighbour<R: Rng + ?Sized>(c: char, rng: &mut R) -> Option<char> {
    neighbours(c).choose(rng).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn home_row_neighbours() {
        let n = neighbours('g');
        for k in ['f', 'h', 't', 'y', 'v', 'b'] {
            assert!(n.contains(&k), "{k} missing from {n:?}");
        }
        assert_eq!(n.len(), 6);
    }

    #[test]
    fn case_is_preserved() {
        assert!(neighbours('Q').iter().all(|k| !k.is_ascii_lowercase()));
        assert!(neighbours('Q').contains(&'W'));
    }

    #[test]
    fn characters_off_the_block_have_none() {
        assert!(neighbours(' ').is_empty());
        assert!(neighbours('é').is_empty());
    }
}
