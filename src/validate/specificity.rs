//! Advisory specificity scoring for CSS selectors

const BASE_SCORE: i32 = 50;
const ID_BONUS: i32 = 30;
const CLASS_BONUS: i32 = 10;
const ATTRIBUTE_BONUS: i32 = 10;
const SEMANTIC_TAG_BONUS: i32 = 15;
const GENERIC_TAG_PENALTY: i32 = 10;
const DEPTH_PENALTY: i32 = 10;

const SEMANTIC_TAGS: &[&str] = &[
    "article", "main", "section", "header", "footer", "nav", "aside", "figure", "time",
];
const GENERIC_TAGS: &[&str] = &["a", "div", "span"];

/// One compound selector between combinators
#[derive(Debug, Default, Clone, PartialEq)]
struct Compound {
    tag: Option<String>,
    ids: i32,
    classes: i32,
    attributes: i32,
}

impl Compound {
    fn is_empty(&self) -> bool {
        self.tag.is_none() && self.ids == 0 && self.classes == 0 && self.attributes == 0
    }

    fn score(&self) -> i32 {
        let tag = match self.tag.as_deref() {
            Some(t) if SEMANTIC_TAGS.contains(&t) => SEMANTIC_TAG_BONUS,
            Some(t) if GENERIC_TAGS.contains(&t) => -GENERIC_TAG_PENALTY,
            _ => 0,
        };
        self.ids * ID_BONUS + self.classes * CLASS_BONUS + self.attributes * ATTRIBUTE_BONUS + tag
    }
}

/// Split on a delimiter outside brackets, parentheses and quotes
fn split_top_level(input: &str, delimiter: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (i, c) in input.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '[' | '(') => depth += 1,
            (None, ']' | ')') => depth = depth.saturating_sub(1),
            (None, c) if c == delimiter && depth == 0 => {
                parts.push(&input[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&input[start..]);
    parts
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '_'
}

/// Skip a bracketed or parenthesized block, honouring quotes
fn skip_block(chars: &[char], mut i: usize, open: char, close: char) -> usize {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    while i < chars.len() {
        let c = chars[i];
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c == open => depth += 1,
            None if c == close => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return i + 1;
                }
            }
            None => {}
        }
        i += 1;
    }
    i
}

fn parse_compounds(group: &str) -> Vec<Compound> {
    let chars: Vec<char> = group.chars().collect();
    let mut compounds = Vec::new();
    let mut current = Compound::default();
    let mut i = 0;

    let read_ident = |start: usize| -> (String, usize) {
        let mut end = start;
        while end < chars.len() && is_ident_char(chars[end]) {
            end += 1;
        }
        (chars[start..end].iter().collect(), end)
    };

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() || c == '>' || c == '+' || c == '~' => {
                if !current.is_empty() {
                    compounds.push(std::mem::take(&mut current));
                }
                i += 1;
            }
            '#' => {
                current.ids += 1;
                i = read_ident(i + 1).1;
            }
            '.' => {
                current.classes += 1;
                i = read_ident(i + 1).1;
            }
            '[' => {
                current.attributes += 1;
                i = skip_block(&chars, i, '[', ']');
            }
            ':' => {
                let mut j = i + 1;
                if j < chars.len() && chars[j] == ':' {
                    j += 1;
                }
                let (_, end) = read_ident(j);
                i = if end < chars.len() && chars[end] == '(' {
                    skip_block(&chars, end, '(', ')')
                } else {
                    end
                };
            }
            '*' => {
                current.tag.get_or_insert_with(|| "*".to_string());
                i += 1;
            }
            c if is_ident_char(c) => {
                let (ident, end) = read_ident(i);
                current.tag = Some(ident.to_ascii_lowercase());
                i = end;
            }
            _ => i += 1,
        }
    }
    if !current.is_empty() {
        compounds.push(current);
    }
    compounds
}

fn score_group(group: &str, max_depth: usize) -> i32 {
    let compounds = parse_compounds(group);
    let mut score = BASE_SCORE + compounds.iter().map(Compound::score).sum::<i32>();

    let depth = compounds.len();
    if depth > max_depth {
        score -= DEPTH_PENALTY * (depth - max_depth) as i32;
    }
    score
}

/// Heuristic 0-100 robustness score.
///
/// Rewards ids, classes, attribute predicates and semantic tags; penalizes
/// bare `a`/`div`/`span` and chains longer than `max_depth`. A selector
/// list scores as its weakest member.
pub fn specificity_score(selector: &str, max_depth: usize) -> u8 {
    split_top_level(selector, ',')
        .into_iter()
        .map(str::trim)
        .filter(|g| !g.is_empty())
        .map(|g| score_group(g, max_depth))
        .min()
        .unwrap_or(0)
        .clamp(0, 100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_semantic_tag_beats_generic() {
        assert_eq!(specificity_score("article a", 5), 55);
        assert_eq!(specificity_score("div a", 5), 30);
        assert!(specificity_score("article a", 5) > specificity_score("div a", 5));
    }

    #[test]
    fn test_ids_classes_and_attributes() {
        assert_eq!(specificity_score("#latest .story-link", 5), 90);
        assert_eq!(specificity_score("a[data-track=\"headline\"]", 5), 50);
        assert_eq!(specificity_score("section.news > h2.title", 5), 85);
    }

    #[test]
    fn test_deep_chains_are_penalized() {
        let shallow = specificity_score("main ul li h3", 5);
        let deep = specificity_score("main div ul li div h3 span", 5);
        assert!(deep < shallow);
    }

    #[test]
    fn test_pseudo_and_brackets_do_not_confuse_parser() {
        // Combinator characters inside attribute values and pseudo arguments are ignored
        assert_eq!(
            parse_compounds("a[title=\"a > b\"]:not(.ad ~ .x)").len(),
            1
        );
        assert_eq!(split_top_level("a[x=\"1,2\"], b", ',').len(), 2);
    }

    #[test]
    fn test_list_scores_as_weakest_member() {
        assert_eq!(specificity_score("article a, div a", 5), 30);
        assert_eq!(specificity_score("", 5), 0);
    }

    #[test]
    fn test_score_is_clamped() {
        assert_eq!(specificity_score("#a #b #c #d", 5), 100);
        assert_eq!(specificity_score("div div div div div div div div a", 5), 0);
    }
}
