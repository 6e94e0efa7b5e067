//! LaTeX text helpers.

/// Escapes characters that are special in LaTeX text mode.
///
/// Used for user-provided metadata and extracted table cells. Synthesized
/// prose is already LaTeX and must not go through this.
pub fn escape_latex(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str(r"\textbackslash{}"),
            '&' | '%' | '$' | '#' | '_' | '{' | '}' => {
                out.push('\\');
                out.push(c);
            }
            '~' => out.push_str(r"\textasciitilde{}"),
            '^' => out.push_str(r"\textasciicircum{}"),
            _ => out.push(c),
        }
    }
    out
}

/// Collapses a caption or title onto one line.
pub fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_specials() {
        assert_eq!(escape_latex("R&D 50%"), r"R\&D 50\%");
        assert_eq!(escape_latex("a_b{c}"), r"a\_b\{c\}");
        assert_eq!(escape_latex(r"C:\x"), r"C:\textbackslash{}x");
        assert_eq!(escape_latex("~^"), r"\textasciitilde{}\textasciicircum{}");
    }

    #[test]
    fn test_escape_leaves_plain_text() {
        assert_eq!(escape_latex("张三 2024-03-01"), "张三 2024-03-01");
    }

    #[test]
    fn test_single_line() {
        assert_eq!(single_line(" a\n  b\tc "), "a b c");
    }
}
