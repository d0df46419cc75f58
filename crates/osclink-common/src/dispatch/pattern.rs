//! Address pattern matching
//!
//! ```text
//! *        any run of characters, '/' included
//! ?        exactly one character
//! [a-z]    one character from a set; ranges are inclusive, '!' negates
//! {a,b}    one of the listed alternatives
//! ```
//!
//! A range written backwards such as `[z-a]` contains its two endpoints and
//! nothing in between. A '-' at the end of a set is literal.

/// Characters that make a path a pattern
pub const PATTERN_CHARS: &[char] = &[' ', '#', '*', ',', '?', '[', ']', '{', '}'];

/// Whether `path` contains pattern characters
pub fn is_pattern(path: &str) -> bool {
    path.contains(PATTERN_CHARS)
}

/// Whether `path` matches `pattern`
pub fn pattern_match(pattern: &str, path: &str) -> bool {
    Matcher::new(pattern.as_bytes(), path.as_bytes()).run(0, 0)
}

/// Backtracking matcher that remembers the outcome of every
/// (pattern offset, path offset) pair it retries, keeping `*` and `{}`
/// within `O(pattern * path)` attempts.
struct Matcher<'a> {
    p: &'a [u8],
    s: &'a [u8],
    seen: Vec<Option<bool>>,
}

impl<'a> Matcher<'a> {
    fn new(p: &'a [u8], s: &'a [u8]) -> Self {
        Self {
            p,
            s,
            seen: Vec::new(),
        }
    }

    fn matches_at(&mut self, pi: usize, si: usize) -> bool {
        if self.seen.is_empty() {
            self.seen = vec![None; (self.p.len() + 1) * (self.s.len() + 1)];
        }
        let key = pi * (self.s.len() + 1) + si;
        if let Some(known) = self.seen[key] {
            return known;
        }
        let outcome = self.run(pi, si);
        self.seen[key] = Some(outcome);
        outcome
    }

    fn run(&mut self, mut pi: usize, mut si: usize) -> bool {
        let (p, s) = (self.p, self.s);
        while pi < p.len() {
            match p[pi] {
                b'*' => {
                    let rest = pi + 1 + leading_stars(&p[pi + 1..]);
                    if rest == p.len() {
                        return true;
                    }
                    return (si..=s.len()).any(|i| self.matches_at(rest, i));
                }
                b'?' => {
                    if si == s.len() {
                        return false;
                    }
                    si += 1;
                    pi += 1;
                }
                b'[' => {
                    let Some(&ch) = s.get(si) else {
                        return false;
                    };
                    match match_set(&p[pi + 1..], ch) {
                        Some((true, consumed)) => {
                            si += 1;
                            pi += 1 + consumed;
                        }
                        _ => return false,
                    }
                }
                b'{' => {
                    let body = &p[pi + 1..];
                    let Some(close) = body.iter().position(|&b| b == b'}') else {
                        return false;
                    };
                    let after = pi + 1 + close + 1;
                    return body[..close]
                        .split(|&b| b == b',')
                        .any(|alt| s[si..].starts_with(alt) && self.matches_at(after, si + alt.len()));
                }
                literal => {
                    if s.get(si) != Some(&literal) {
                        return false;
                    }
                    si += 1;
                    pi += 1;
                }
            }
        }
        si == s.len()
    }
}

fn leading_stars(p: &[u8]) -> usize {
    p.iter().take_while(|&&b| b == b'*').count()
}

/// Matches `ch` against the set starting right after '['.
///
/// Returns the outcome and how many pattern bytes the set spans including
/// the closing ']', or `None` when the set is not terminated.
fn match_set(p: &[u8], ch: u8) -> Option<(bool, usize)> {
    let (negate, skip, p) = match p.split_first() {
        Some((b'!', rest)) => (true, 1, rest),
        _ => (false, 0, p),
    };
    // a ']' right after the opening bracket is a member
    let close = p.iter().skip(1).position(|&b| b == b']')? + 1;
    let set = &p[..close];

    let mut matched = false;
    let mut i = 0;
    while i < set.len() {
        if i + 2 < set.len() && set[i + 1] == b'-' {
            let (lo, hi) = (set[i], set[i + 2]);
            matched |= ch == lo || ch == hi || (lo < ch && ch < hi);
            i += 3;
        } else {
            matched |= ch == set[i];
            i += 1;
        }
    }
    Some((matched != negate, skip + close + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal() {
        assert!(pattern_match("/foo/bar", "/foo/bar"));
        assert!(!pattern_match("/foo/bar", "/foo/baz"));
        assert!(!pattern_match("/foo/bar", "/foo/bar/x"));
        assert!(!pattern_match("/foo/bar/x", "/foo/bar"));
    }

    #[test]
    fn test_star() {
        assert!(pattern_match("/foo/*", "/foo/bar"));
        assert!(pattern_match("/foo/*", "/foo/"));
        assert!(pattern_match("/*/bar", "/foo/bar"));
        assert!(pattern_match("/f*r", "/foo/bar"));
        assert!(pattern_match("/a**b", "/ab"));
        assert!(!pattern_match("/foo/*", "/fo"));
        assert!(pattern_match("*", ""));
    }

    #[test]
    fn test_question_mark() {
        assert!(pattern_match("/fo?", "/foo"));
        assert!(!pattern_match("/fo?", "/fo"));
        assert!(!pattern_match("/fo?", "/fooo"));
    }

    #[test]
    fn test_sets() {
        assert!(pattern_match("/foo/ba[rz]", "/foo/baz"));
        assert!(pattern_match("/foo/ba[rz]", "/foo/bar"));
        assert!(!pattern_match("/foo/ba[rz]", "/foo/bay"));
        assert!(pattern_match("/n[0-9]", "/n5"));
        assert!(!pattern_match("/n[0-9]", "/nx"));
        assert!(pattern_match("/n[!0-9]", "/nx"));
        assert!(!pattern_match("/n[!0-9]", "/n5"));
        assert!(pattern_match("/x[a-]", "/x-"));
        assert!(pattern_match("/x[]]", "/x]"));
    }

    #[test]
    fn test_reversed_range_holds_only_endpoints() {
        assert!(pattern_match("[z-a]", "z"));
        assert!(pattern_match("[z-a]", "a"));
        assert!(!pattern_match("[z-a]", "m"));
    }

    #[test]
    fn test_unterminated_set_never_matches() {
        assert!(!pattern_match("/foo/[ab", "/foo/a"));
        assert!(!pattern_match("/foo/{a,b", "/foo/a"));
    }

    #[test]
    fn test_braces() {
        assert!(pattern_match("/foo/{a,b}", "/foo/a"));
        assert!(pattern_match("/foo/{a,b}", "/foo/b"));
        assert!(!pattern_match("/foo/{a,b}", "/foo/c"));
        assert!(!pattern_match("/foo/{a,b}", "/foo/ab"));
        assert!(pattern_match("/{in,out}put/*", "/output/left"));
        assert!(pattern_match("/{a,ab}c", "/abc"));
    }

    #[test]
    fn test_repeated_wildcards_stay_fast() {
        let pattern = format!("{}X", "*?".repeat(16));
        let path = "/synth/oscillator/frequency/left";
        let started = std::time::Instant::now();
        assert!(!pattern_match(&pattern, path));
        assert!(pattern_match(&format!("{}t", "*?".repeat(12)), path));
        assert!(!pattern_match(&format!("{}{{a,b}}X", "*".repeat(40)), path));
        assert!(started.elapsed() < std::time::Duration::from_secs(1));
    }

    #[test]
    fn test_is_pattern() {
        assert!(is_pattern("/foo/*"));
        assert!(is_pattern("/a b"));
        assert!(!is_pattern("/foo/bar"));
    }
}
