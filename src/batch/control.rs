//! Negative controls: deliberately degraded references.

use rand::Rng;
use rand::seq::index;

/// Literal token substituted into bad references.
pub const BAD_TOKEN: &str = "[BAD]";

/// Replace two tokens of `reference` with [`BAD_TOKEN`] and capitalise a
/// third. References shorter than three tokens get two sentinels appended.
pub fn degrade_reference<R: Rng + ?Sized>(reference: &str, rng: &mut R) -> String {
    let mut tokens: Vec<String> = reference.split_whitespace().map(str::to_string).collect();

    if tokens.len() < 3 {
        tokens.push(BAD_TOKEN.to_string());
        tokens.push(BAD_TOKEN.to_string());
        return tokens.join(" ");
    }

    let picks = index::sample(rng, tokens.len(), 3);
    tokens[picks.index(0)] = BAD_TOKEN.to_string();
    tokens[picks.index(1)] = BAD_TOKEN.to_string();
    let third = picks.index(2);
    tokens[third] = capitalize(&tokens[third]);

    tokens.join(" ")
}

fn capitalize(token: &str) -> String {
    let mut chars = token.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn long_reference_gets_two_sentinels_and_a_capital() {
        let mut rng = StdRng::seed_from_u64(42);
        let bad = degrade_reference("the cat sat on the mat today", &mut rng);
        let tokens: Vec<&str> = bad.split(' ').collect();

        assert_eq!(tokens.len(), 7);
        assert_eq!(tokens.iter().filter(|t| **t == BAD_TOKEN).count(), 2);
        assert_eq!(
            tokens
                .iter()
                .filter(|t| t.chars().next().is_some_and(char::is_uppercase))
                .count(),
            1
        );
    }

    #[test]
    fn short_reference_gets_sentinels_appended() {
        let mut rng = StdRng::seed_from_u64(42);
        assert_eq!(degrade_reference("hello world", &mut rng), "hello world [BAD] [BAD]");
        assert_eq!(degrade_reference("", &mut rng), "[BAD] [BAD]");
    }

    #[test]
    fn same_seed_same_damage() {
        let text = "a quick brown fox jumps over the lazy dog";
        let a = degrade_reference(text, &mut StdRng::seed_from_u64(3));
        let b = degrade_reference(text, &mut StdRng::seed_from_u64(3));
        assert_eq!(a, b);
    }
}
