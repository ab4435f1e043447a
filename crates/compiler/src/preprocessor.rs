//! Preprocessor (§4.1)
//!
//! Operates line-by-line on the raw source, before the lexer ever sees it.
//! Recognises `#define`, `#if`/`#else`/`#endif`, and leaves unknown
//! directives untouched. The special macro names `SAFE` and
//! `DISABLE_SAFE_BUFFER_ACCESS` are recorded separately as the safe-buffer
//! compile flag consumed by the function parser (§4.4).

use std::collections::HashMap;

pub struct PreprocessResult {
    pub source: String,
    /// `true` unless `DISABLE_SAFE_BUFFER_ACCESS` was defined (or `SAFE`
    /// was explicitly defined to `0`).
    pub safe_buffer_access: bool,
}

pub struct PreprocessError {
    pub message: String,
    /// Line number (0-indexed) the error was detected on.
    pub line: usize,
}

const SAFE_MACRO: &str = "SAFE";
const DISABLE_SAFE_MACRO: &str = "DISABLE_SAFE_BUFFER_ACCESS";

/// `default_safe` is the compiler-configured baseline (§4.1,
/// `CompilerConfig::safe_buffer_access_default`), used when the source
/// defines neither `SAFE` nor `DISABLE_SAFE_BUFFER_ACCESS`.
pub fn preprocess(source: &str, default_safe: bool) -> Result<PreprocessResult, PreprocessError> {
    let mut macros: HashMap<String, String> = HashMap::new();
    let lines: Vec<&str> = source.split('\n').collect();

    // First pass: expand #define textually, in source order, and track
    // #if/#else/#endif nesting to decide which lines survive.
    let mut out_lines: Vec<String> = Vec::with_capacity(lines.len());
    // Stack of (condition_true, currently_in_else)
    let mut if_stack: Vec<(bool, bool)> = Vec::new();

    for (line_no, raw_line) in lines.iter().enumerate() {
        let trimmed = raw_line.trim_start();

        if let Some(rest) = trimmed.strip_prefix("#define") {
            let rest = rest.trim();
            let mut parts = rest.splitn(2, char::is_whitespace);
            let name = parts.next().unwrap_or("").trim();
            if name.is_empty() {
                return Err(PreprocessError {
                    message: "#define missing macro name".to_string(),
                    line: line_no,
                });
            }
            let value = parts.next().unwrap_or("").trim();
            let value = if value.is_empty() { "1" } else { value };
            macros.insert(name.to_string(), value.to_string());
            out_lines.push(String::new());
            continue;
        }

        if let Some(rest) = trimmed.strip_prefix("#if") {
            let cond_text = expand_macros(rest.trim(), &macros);
            let cond = match cond_text.trim() {
                "0" => false,
                "1" => true,
                other => {
                    return Err(PreprocessError {
                        message: format!("#if condition must be 0 or 1, got \"{other}\""),
                        line: line_no,
                    });
                }
            };
            let parent_active = if_stack.iter().all(|(c, in_else)| if *in_else { !*c } else { *c });
            if_stack.push((cond, false));
            let _ = parent_active;
            out_lines.push(String::new());
            continue;
        }

        if trimmed.starts_with("#else") {
            match if_stack.last_mut() {
                Some((_, in_else)) => *in_else = true,
                None => {
                    return Err(PreprocessError {
                        message: "#else without matching #if".to_string(),
                        line: line_no,
                    });
                }
            }
            out_lines.push(String::new());
            continue;
        }

        if trimmed.starts_with("#endif") {
            if if_stack.pop().is_none() {
                return Err(PreprocessError {
                    message: "#endif without matching #if".to_string(),
                    line: line_no,
                });
            }
            out_lines.push(String::new());
            continue;
        }

        let active = if_stack
            .iter()
            .all(|(cond, in_else)| if *in_else { !*cond } else { *cond });

        if !active {
            out_lines.push(String::new());
            continue;
        }

        out_lines.push(expand_macros(raw_line, &macros));
    }

    if !if_stack.is_empty() {
        return Err(PreprocessError {
            message: "Unbalanced #if: missing #endif".to_string(),
            line: lines.len().saturating_sub(1),
        });
    }

    let safe_buffer_access = match (macros.get(DISABLE_SAFE_MACRO), macros.get(SAFE_MACRO)) {
        (Some(_), _) => false,
        (None, Some(v)) => v.trim() != "0",
        (None, None) => default_safe,
    };

    Ok(PreprocessResult {
        source: out_lines.join("\n"),
        safe_buffer_access,
    })
}

/// Textual macro substitution. Only replaces whole-identifier occurrences
/// so that e.g. a macro `N` does not corrupt `MAXN`.
fn expand_macros(line: &str, macros: &HashMap<String, String>) -> String {
    if macros.is_empty() {
        return line.to_string();
    }
    let mut result = String::with_capacity(line.len());
    let bytes = line.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < bytes.len() {
                let ch = bytes[i] as char;
                if ch.is_ascii_alphanumeric() || ch == '_' {
                    i += 1;
                } else {
                    break;
                }
            }
            let word = &line[start..i];
            match macros.get(word) {
                Some(replacement) => result.push_str(replacement),
                None => result.push_str(word),
            }
        } else {
            result.push(c);
            i += 1;
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_source_without_directives() {
        let src = "float x = 0.5f;\nfloat process(float input) { return input; }";
        let result = preprocess(src, true).unwrap();
        assert_eq!(result.source, src);
    }

    #[test]
    fn define_without_value_defaults_to_one() {
        let src = "#define FOO\nint x = FOO;";
        let result = preprocess(src, true).unwrap();
        assert!(result.source.contains("int x = 1;"));
    }

    #[test]
    fn define_substitutes_textually() {
        let src = "#define N 1024\nBuffer b(N);";
        let result = preprocess(src, true).unwrap();
        assert!(result.source.contains("Buffer b(1024);"));
    }

    #[test]
    fn if_0_removes_body_keeps_else() {
        let src = "#if 0\nint dead;\n#else\nint alive;\n#endif";
        let result = preprocess(src, true).unwrap();
        assert!(!result.source.contains("dead"));
        assert!(result.source.contains("alive"));
    }

    #[test]
    fn unbalanced_if_errors() {
        let src = "#if 1\nint x;";
        assert!(preprocess(src, true).is_err());
    }

    #[test]
    fn disable_safe_buffer_macro_toggles_flag() {
        let src = "#define DISABLE_SAFE_BUFFER_ACCESS\nint x;";
        let result = preprocess(src, true).unwrap();
        assert!(!result.safe_buffer_access);
    }

    #[test]
    fn default_is_safe() {
        let result = preprocess("int x;", true).unwrap();
        assert!(result.safe_buffer_access);
    }

    #[test]
    fn config_default_can_disable_safety() {
        let result = preprocess("int x;", false).unwrap();
        assert!(!result.safe_buffer_access);
    }
}
