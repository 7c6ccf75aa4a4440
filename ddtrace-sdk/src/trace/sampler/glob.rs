/// A glob pattern where `*` matches any run of characters, including none.
///
/// Every other character, `?` included, matches itself. Matching ignores
/// ASCII case.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct GlobMatcher {
    pattern: Vec<char>,
    match_all: bool,
}

impl GlobMatcher {
    pub(crate) fn new(pattern: &str) -> Self {
        let pattern: Vec<char> = pattern.chars().map(|c| c.to_ascii_lowercase()).collect();
        let match_all = !pattern.is_empty() && pattern.iter().all(|c| *c == '*');
        GlobMatcher { pattern, match_all }
    }

    pub(crate) fn is_match(&self, subject: &str) -> bool {
        if self.match_all {
            return true;
        }
        let subject: Vec<char> = subject.chars().map(|c| c.to_ascii_lowercase()).collect();

        // Greedy two-pointer match that backtracks to the last `*`.
        let (mut p, mut s) = (0, 0);
        let mut star: Option<(usize, usize)> = None;
        while s < subject.len() {
            if p < self.pattern.len() && self.pattern[p] == '*' {
                star = Some((p, s));
                p += 1;
            } else if p < self.pattern.len() && self.pattern[p] == subject[s] {
                p += 1;
                s += 1;
            } else if let Some((star_p, star_s)) = star {
                p = star_p + 1;
                s = star_s + 1;
                star = Some((star_p, star_s + 1));
            } else {
                return false;
            }
        }
        self.pattern[p..].iter().all(|c| *c == '*')
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("*", "", true)]
    #[case("*", "anything", true)]
    #[case("", "", true)]
    #[case("", "a", false)]
    #[case("web", "web", true)]
    #[case("web", "Web", true)]
    #[case("web", "web2", false)]
    #[case("web*", "web-api", true)]
    #[case("*api", "web-api", true)]
    #[case("w*b*i", "web-api", true)]
    #[case("w*b*x", "web-api", false)]
    #[case("a*a", "aaa", true)]
    #[case("a*a", "ab", false)]
    #[case("a?c", "abc", false)]
    #[case("a?c", "a?c", true)]
    #[case("a.*", "api", false)]
    #[case("a.*", "a.b", true)]
    #[case("**", "x", true)]
    fn glob_matching(#[case] pattern: &str, #[case] subject: &str, #[case] expected: bool) {
        assert_eq!(
            GlobMatcher::new(pattern).is_match(subject),
            expected,
            "{} vs {}",
            pattern,
            subject
        );
    }
}
