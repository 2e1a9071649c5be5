//! Alias deduplication: collapse name variants into canonical names.
//!
//! A raw LLM name list routinely contains variants of the same person:
//! `Harry` / `Harry Potter`, `Mrs Smith` / `Professor Smith`,
//! `Hermoine` / `Hermione`. Strategies are applied in order under a
//! union-find over the full input set:
//!
//! 1. **Title stripping** — leading honorifics are removed before
//!    comparison.
//! 2. **Whole-word substring** — one stripped form appearing as a
//!    contiguous word sequence inside another merges the pair.
//! 3. **Fuzzy match** — normalized sequence similarity ≥ 0.85 on the
//!    stripped, lowercased forms catches misspellings.
//! 4. **Semantic match (optional)** — an LLM yes/no per remaining pair,
//!    catching aliases with no string signal (`Mrs Dursley` ≡
//!    `Petunia`). Degrades silently to a no-op on quota or transient
//!    failure; correctness is defined by strategies 1–3 alone.
//!
//! Canonical selection inside a merged group: longest form, then the
//! form without a stripped-off title, then the lexicographically
//! earliest.

use std::collections::BTreeMap;

use crate::llm::ChatModel;

/// Leading honorifics stripped before comparison.
const TITLES: [&str; 8] = ["mr", "mrs", "ms", "miss", "dr", "professor", "sir", "lady"];

/// Merge threshold for the fuzzy strategy.
const FUZZY_THRESHOLD: f64 = 0.85;

/// Deduplicate with the string strategies (1–3). Returns the canonical
/// names in first-appearance order and the surface → canonical alias map.
pub fn deduplicate(names: &[String]) -> (Vec<String>, BTreeMap<String, String>) {
    let mut uf = string_union(names);
    collect_groups(names, &mut uf)
}

/// Deduplicate with the string strategies plus the LLM pair-matching
/// pass. Never fails: any LLM error silently leaves the string-strategy
/// result in place, and a quota error stops further pair queries.
pub async fn deduplicate_semantic(
    llm: &dyn ChatModel,
    names: &[String],
) -> (Vec<String>, BTreeMap<String, String>) {
    let mut uf = string_union(names);

    let roster = names.join(", ");
    'outer: for i in 0..names.len() {
        for j in (i + 1)..names.len() {
            if uf.find(i) == uf.find(j) {
                continue;
            }
            match same_character(llm, &names[i], &names[j], &roster).await {
                Ok(true) => uf.union(i, j),
                Ok(false) => {}
                Err(crate::error::LlmError::Quota) => break 'outer,
                Err(_) => {}
            }
        }
    }

    collect_groups(names, &mut uf)
}

async fn same_character(
    llm: &dyn ChatModel,
    a: &str,
    b: &str,
    roster: &str,
) -> Result<bool, crate::error::LlmError> {
    let system = "You answer questions about fictional characters with exactly YES or NO.";
    let user = format!(
        "Are these two names referring to the same fictional character in a book?\n\
         \n\
         Name 1: {}\n\
         Name 2: {}\n\
         \n\
         Other characters in this book: {}\n\
         \n\
         Consider married names vs maiden names, first names vs full names,\n\
         titles vs names, and nicknames vs real names.\n\
         Answer with ONLY \"YES\" or \"NO\".",
        a, b, roster
    );
    let answer = llm.complete(system, &user).await?;
    Ok(answer.trim().to_uppercase().starts_with("YES"))
}

fn string_union(names: &[String]) -> UnionFind {
    let mut uf = UnionFind::new(names.len());
    for i in 0..names.len() {
        for j in (i + 1)..names.len() {
            if string_match(&names[i], &names[j]) {
                uf.union(i, j);
            }
        }
    }
    uf
}

fn collect_groups(
    names: &[String],
    uf: &mut UnionFind,
) -> (Vec<String>, BTreeMap<String, String>) {
    // Group members by root, preserving first-appearance order of groups.
    let mut group_order: Vec<usize> = Vec::new();
    let mut groups: BTreeMap<usize, Vec<&str>> = BTreeMap::new();
    for (i, name) in names.iter().enumerate() {
        let root = uf.find(i);
        if !groups.contains_key(&root) {
            group_order.push(root);
        }
        groups.entry(root).or_default().push(name);
    }

    let mut canonical_names = Vec::with_capacity(group_order.len());
    let mut alias_map = BTreeMap::new();

    for root in group_order {
        let members = &groups[&root];
        let canonical = select_canonical(members);
        for member in members {
            if *member != canonical {
                alias_map.insert(member.to_string(), canonical.clone());
            }
        }
        if !canonical_names.contains(&canonical) {
            canonical_names.push(canonical);
        }
    }

    (canonical_names, alias_map)
}

/// Prefer the longest form; among ties the form without a stripped-off
/// title; among remaining ties the lexicographically earliest.
fn select_canonical(members: &[&str]) -> String {
    let mut best = members[0];
    for &cand in &members[1..] {
        if prefer(cand, best) {
            best = cand;
        }
    }
    best.to_string()
}

fn prefer(a: &str, b: &str) -> bool {
    let (a_len, b_len) = (a.chars().count(), b.chars().count());
    if a_len != b_len {
        return a_len > b_len;
    }
    let (a_titled, b_titled) = (has_title(a), has_title(b));
    if a_titled != b_titled {
        return !a_titled;
    }
    a < b
}

/// Whether the two names match under the string strategies: whole-word
/// substring or fuzzy similarity of the stripped, lowercased forms.
fn string_match(a: &str, b: &str) -> bool {
    let sa = strip_title(a).to_lowercase();
    let sb = strip_title(b).to_lowercase();
    if sa.is_empty() || sb.is_empty() {
        return false;
    }

    let ta: Vec<&str> = sa.split_whitespace().collect();
    let tb: Vec<&str> = sb.split_whitespace().collect();
    let (short, long) = if ta.len() <= tb.len() {
        (&ta, &tb)
    } else {
        (&tb, &ta)
    };
    if long.windows(short.len()).any(|w| w == short.as_slice()) {
        return true;
    }

    similarity(&sa, &sb) >= FUZZY_THRESHOLD
}

/// Remove a single leading honorific (with or without a trailing dot).
fn strip_title(name: &str) -> &str {
    let trimmed = name.trim();
    if let Some(pos) = trimmed.find(char::is_whitespace) {
        let first = trimmed[..pos].trim_end_matches('.');
        if TITLES.iter().any(|t| first.eq_ignore_ascii_case(t)) {
            return trimmed[pos..].trim_start();
        }
    }
    trimmed
}

fn has_title(name: &str) -> bool {
    strip_title(name) != name.trim()
}

/// Normalized sequence similarity in `[0, 1]`: `1 − d/max_len` where `d`
/// is the optimal-string-alignment distance (Levenshtein plus adjacent
/// transposition, so `Hermoine` ~ `Hermione` scores 0.875).
fn similarity(a: &str, b: &str) -> f64 {
    let ca: Vec<char> = a.chars().collect();
    let cb: Vec<char> = b.chars().collect();
    let max_len = ca.len().max(cb.len());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - osa_distance(&ca, &cb) as f64 / max_len as f64
}

fn osa_distance(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let width = b.len() + 1;
    let mut prev_prev = vec![0usize; width];
    let mut prev: Vec<usize> = (0..width).collect();
    let mut curr = vec![0usize; width];

    for i in 0..a.len() {
        curr[0] = i + 1;
        for j in 0..b.len() {
            let cost = if a[i] == b[j] { 0 } else { 1 };
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
            if i > 0 && j > 0 && a[i] == b[j - 1] && a[i - 1] == b[j] {
                curr[j + 1] = curr[j + 1].min(prev_prev[j - 1] + 1);
            }
        }
        std::mem::swap(&mut prev_prev, &mut prev);
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut cur = x;
        while self.parent[cur] != root {
            let next = self.parent[cur];
            self.parent[cur] = root;
            cur = next;
        }
        root
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            // Smaller root wins so group identity follows first appearance.
            let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[hi] = lo;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn single_name_unchanged() {
        let (canonical, aliases) = deduplicate(&names(&["Harry Potter"]));
        assert_eq!(canonical, vec!["Harry Potter"]);
        assert!(aliases.is_empty());
    }

    #[test]
    fn substring_merges_to_longest() {
        let (canonical, aliases) = deduplicate(&names(&["Harry", "Harry Potter", "Ron"]));
        assert_eq!(canonical, vec!["Harry Potter", "Ron"]);
        assert_eq!(aliases.get("Harry").map(String::as_str), Some("Harry Potter"));
    }

    #[test]
    fn title_stripped_duplicates_merge() {
        let (canonical, aliases) = deduplicate(&names(&["Mrs Smith", "Professor Smith"]));
        assert_eq!(canonical.len(), 1);
        assert_eq!(aliases.len(), 1);
    }

    #[test]
    fn fuzzy_catches_transposed_misspelling() {
        assert!(similarity("hermoine", "hermione") >= FUZZY_THRESHOLD);
        let (canonical, _) = deduplicate(&names(&["Hermione Granger", "Hermoine Granger"]));
        assert_eq!(canonical, vec!["Hermione Granger"]);
    }

    #[test]
    fn unrelated_names_stay_apart() {
        let list = names(&["Harry Potter", "Hermione Granger", "Albus Dumbledore"]);
        let (canonical, aliases) = deduplicate(&list);
        assert_eq!(canonical.len(), 3);
        assert!(aliases.is_empty());
    }

    #[test]
    fn title_stripped_surname_variants_merge() {
        // "Mr Dursley" and "Mrs Dursley" strip to the same surname and
        // merge; the longer surface form becomes canonical.
        let (canonical, _) = deduplicate(&names(&["Mr Dursley", "Mrs Dursley"]));
        assert_eq!(canonical, vec!["Mrs Dursley"]);
    }

    #[test]
    fn canonical_prefers_untitled_on_length_tie() {
        let (canonical, _) = deduplicate(&names(&["Dr Smith", "Jo Smith"]));
        assert_eq!(canonical, vec!["Jo Smith"]);
    }

    #[test]
    fn canonical_prefers_lexicographic_on_full_tie() {
        let (canonical, _) = deduplicate(&names(&["Bob Ames", "Bob Amos"]));
        // 7-char names, similarity 0.875 ≥ threshold, no titles.
        assert_eq!(canonical, vec!["Bob Ames"]);
    }

    #[test]
    fn first_appearance_order_is_preserved() {
        let list = names(&["Ron", "Hermione", "Harry", "Harry Potter"]);
        let (canonical, _) = deduplicate(&list);
        assert_eq!(canonical, vec!["Ron", "Hermione", "Harry Potter"]);
    }

    #[test]
    fn exact_duplicates_collapse_without_aliases() {
        let (canonical, aliases) = deduplicate(&names(&["Hagrid", "Hagrid"]));
        assert_eq!(canonical, vec!["Hagrid"]);
        assert!(aliases.is_empty());
    }

    #[test]
    fn strip_title_variants() {
        assert_eq!(strip_title("Mrs Dursley"), "Dursley");
        assert_eq!(strip_title("Dr. Watson"), "Watson");
        assert_eq!(strip_title("Professor Albus Dumbledore"), "Albus Dumbledore");
        assert_eq!(strip_title("Miss"), "Miss");
        assert_eq!(strip_title("Ladybird Jones"), "Ladybird Jones");
    }

    struct ScriptedMatcher {
        answer: &'static str,
    }

    #[async_trait::async_trait]
    impl ChatModel for ScriptedMatcher {
        async fn complete(
            &self,
            _system: &str,
            _user: &str,
        ) -> Result<String, crate::error::LlmError> {
            Ok(self.answer.to_string())
        }
    }

    struct FailingMatcher;

    #[async_trait::async_trait]
    impl ChatModel for FailingMatcher {
        async fn complete(
            &self,
            _system: &str,
            _user: &str,
        ) -> Result<String, crate::error::LlmError> {
            Err(crate::error::LlmError::Quota)
        }
    }

    #[tokio::test]
    async fn semantic_pass_merges_on_yes() {
        let llm = ScriptedMatcher { answer: "YES" };
        let (canonical, aliases) =
            deduplicate_semantic(&llm, &names(&["Mrs Dursley", "Petunia"])).await;
        assert_eq!(canonical, vec!["Mrs Dursley"]);
        assert_eq!(
            aliases.get("Petunia").map(String::as_str),
            Some("Mrs Dursley")
        );
    }

    #[tokio::test]
    async fn semantic_pass_degrades_silently_on_quota() {
        let llm = FailingMatcher;
        let list = names(&["Mrs Dursley", "Petunia"]);
        let (canonical, aliases) = deduplicate_semantic(&llm, &list).await;
        let (expected_canonical, expected_aliases) = deduplicate(&list);
        assert_eq!(canonical, expected_canonical);
        assert_eq!(aliases, expected_aliases);
    }
}
