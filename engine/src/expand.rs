//! Variable substitution and shell-style expansion of instruction values.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::{Captures, Regex};

fn variable_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\\\$|\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
            .expect("variable pattern is valid")
    })
}

/// Replace `${VAR}` and `$VAR` references with values from `variables`.
///
/// Unknown variables and escaped `\$` are left untouched so the shell in
/// the build container can still see them.
pub fn substitute_variables(s: &str, variables: &HashMap<String, String>) -> String {
    variable_pattern()
        .replace_all(s, |caps: &Captures| {
            let name = caps.get(1).or_else(|| caps.get(2));
            match name.and_then(|n| variables.get(n.as_str())) {
                Some(value) => value.clone(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Tokenise `value` like a shell would, brace-expand every token and join
/// the result with single spaces.
///
/// JSON exec-form values (`["a", "b"]`) and values that cannot be
/// tokenised are returned unchanged.
pub fn apply_shell_expansion(value: &str) -> String {
    if value.trim_start().starts_with('[') {
        return value.to_string();
    }

    match shell_words::split(value) {
        Ok(words) => words
            .iter()
            .flat_map(|word| expand_braces(word))
            .collect::<Vec<_>>()
            .join(" "),
        Err(e) => {
            tracing::warn!(value, error = %e, "Shell expansion failed, using raw value");
            value.to_string()
        }
    }
}

/// Expand `{a,b}` alternations in a single word.
///
/// `pre{a,b}post` becomes `["preapost", "prebpost"]`; nested groups are
/// expanded recursively. Groups without a top-level comma and unbalanced
/// braces are kept literally.
pub fn expand_braces(word: &str) -> Vec<String> {
    let bytes = word.as_bytes();
    let mut start = 0;

    while let Some(offset) = bytes[start..].iter().position(|&b| b == b'{') {
        let open = start + offset;
        let Some((close, commas)) = matching_brace(bytes, open) else {
            break;
        };

        if commas.is_empty() {
            start = open + 1;
            continue;
        }

        let prefix = &word[..open];
        let suffix = &word[close + 1..];
        let mut bounds = Vec::with_capacity(commas.len() + 2);
        bounds.push(open);
        bounds.extend(commas);
        bounds.push(close);

        return bounds
            .windows(2)
            .flat_map(|w| {
                let alternative = &word[w[0] + 1..w[1]];
                expand_braces(&format!("{}{}{}", prefix, alternative, suffix))
            })
            .collect();
    }

    vec![word.to_string()]
}

/// Find the brace closing the one at `open` and the top-level commas inside.
fn matching_brace(bytes: &[u8], open: usize) -> Option<(usize, Vec<usize>)> {
    let mut depth = 0usize;
    let mut commas = Vec::new();

    for (idx, &b) in bytes.iter().enumerate().skip(open) {
        match b {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some((idx, commas));
                }
            }
            b',' if depth == 1 => commas.push(idx),
            _ => {}
        }
    }

    None
}
