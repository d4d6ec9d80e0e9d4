//! Inline color codes.
//!
//! Text carries `{x`-style codes; on output they become ANSI escapes for
//! players with color enabled and are stripped for everyone else.

static CODES: [(&str, &str); 9] = [
    ("{x", "\u{1b}[0m"),
    ("{k", "\u{1b}[30m"),
    ("{r", "\u{1b}[31m"),
    ("{g", "\u{1b}[32m"),
    ("{y", "\u{1b}[33m"),
    ("{b", "\u{1b}[34m"),
    ("{m", "\u{1b}[35m"),
    ("{c", "\u{1b}[36m"),
    ("{w", "\u{1b}[37m"),
];

/// Replace color codes with ANSI escapes.
pub fn parse(input: &str) -> String {
    translate(input, |ansi| ansi)
}

/// Remove color codes.
pub fn strip(input: &str) -> String {
    translate(input, |_| "")
}

pub fn render(input: &str, color: bool) -> String {
    if color {
        parse(input)
    } else {
        strip(input)
    }
}

fn translate(input: &str, replacement: impl Fn(&'static str) -> &'static str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(pos) = rest.find('{') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        match CODES.iter().find(|(code, _)| tail.starts_with(code)) {
            Some(&(code, ansi)) => {
                out.push_str(replacement(ansi));
                rest = &tail[code.len()..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_known_codes_only() {
        assert_eq!(strip("{yYou say, {x'hi{x'"), "You say, 'hi'");
        assert_eq!(strip("{G{z{"), "{G{z{");
    }

    #[test]
    fn parses_to_ansi() {
        assert_eq!(parse("{rred{x"), "\u{1b}[31mred\u{1b}[0m");
        assert_eq!(render("{cX", false), "X");
    }
}
