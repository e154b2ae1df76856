/// Default comparison: both sides are trimmed at the edges, then must match
/// exactly. Whitespace inside the body is significant.
pub fn compare(actual: &str, expected: &str) -> bool {
    actual.trim() == expected.trim()
}

/// Per-problem comparison policy.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum Comparison {
    #[default]
    Exact,
    /// Token-wise comparison where numeric tokens may differ by `eps`,
    /// absolute or relative to the expected value.
    Tolerance(f64),
}

impl Comparison {
    pub fn matches(&self, actual: &str, expected: &str) -> bool {
        match self {
            Comparison::Exact => compare(actual, expected),
            Comparison::Tolerance(eps) => tokens_match(actual, expected, *eps),
        }
    }
}

fn tokens_match(actual: &str, expected: &str, eps: f64) -> bool {
    let actual: Vec<&str> = actual.split_whitespace().collect();
    let expected: Vec<&str> = expected.split_whitespace().collect();

    actual.len() == expected.len()
        && actual
            .iter()
            .zip(&expected)
            .all(|(a, e)| token_matches(a, e, eps))
}

fn token_matches(actual: &str, expected: &str, eps: f64) -> bool {
    if actual == expected {
        return true;
    }
    match (actual.parse::<f64>(), expected.parse::<f64>()) {
        (Ok(a), Ok(e)) => {
            let diff = (a - e).abs();
            diff <= eps || diff <= eps * e.abs()
        }
        _ => false,
    }
}
