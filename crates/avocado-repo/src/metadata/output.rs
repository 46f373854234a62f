//! Cleans indexer output before it reaches the log.

const MAX_LINE_CHARS: usize = 2048;

/// Strips ANSI escape sequences (CSI, OSC, and ST-terminated strings),
/// control characters, and bidi overrides from one line of indexer output,
/// and bounds its length.
pub fn clean_line(input: &str) -> String {
    let mut out = String::with_capacity(input.len().min(MAX_LINE_CHARS));
    let mut kept = 0usize;
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\x1b' {
            match chars.next() {
                Some('[') => {
                    // CSI: parameters until a final byte in '@'..='~'.
                    for n in chars.by_ref() {
                        if ('@'..='~').contains(&n) {
                            break;
                        }
                    }
                }
                Some(']') | Some('P') | Some('X') | Some('^') | Some('_') => {
                    // OSC may end with BEL; all of these may end with ESC '\'.
                    while let Some(n) = chars.next() {
                        if n == '\x07' {
                            break;
                        }
                        if n == '\x1b' && chars.peek() == Some(&'\\') {
                            chars.next();
                            break;
                        }
                    }
                }
                _ => {}
            }
            continue;
        }

        let c = if c == '\t' { ' ' } else { c };
        if c.is_control() || is_bidi_control(c) {
            continue;
        }
        if kept == MAX_LINE_CHARS {
            out.push_str(" ...[truncated]");
            break;
        }
        out.push(c);
        kept += 1;
    }

    out.trim_end().to_string()
}

fn is_bidi_control(c: char) -> bool {
    matches!(c, '\u{061C}' | '\u{200E}' | '\u{200F}')
        || ('\u{202A}'..='\u{202E}').contains(&c)
        || ('\u{2066}'..='\u{2069}').contains(&c)
}
