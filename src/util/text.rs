use std::borrow::Cow;

use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

/// Ellipsis appended to truncated text
const ELLIPSIS: &str = "...";
const ELLIPSIS_WIDTH: usize = 3;

/// Display width of a string in terminal columns.
///
/// CJK characters and most emoji occupy two columns, combining marks none.
///
/// ```
/// use streamshelf::util::display_width;
///
/// assert_eq!(display_width("Hello"), 5);
/// assert_eq!(display_width("日本"), 4);
/// ```
pub fn display_width(s: &str) -> usize {
    UnicodeWidthStr::width(s)
}

/// Truncates a string to at most `max_width` columns, appending "..." when
/// anything was cut.
///
/// Widths of three columns or fewer leave no room for the ellipsis, so the
/// string is simply cut to whatever fits.
///
/// ```
/// use streamshelf::util::truncate_to_width;
///
/// assert_eq!(truncate_to_width("Short", 10), "Short");
/// assert_eq!(truncate_to_width("Hello World", 8), "Hello...");
/// assert_eq!(truncate_to_width("Test", 2), "Te");
/// ```
pub fn truncate_to_width(s: &str, max_width: usize) -> Cow<'_, str> {
    if display_width(s) <= max_width {
        return Cow::Borrowed(s);
    }
    if max_width <= ELLIPSIS_WIDTH {
        return Cow::Owned(take_columns(s, max_width).to_owned());
    }
    let kept = take_columns(s, max_width - ELLIPSIS_WIDTH);
    Cow::Owned(format!("{kept}{ELLIPSIS}"))
}

/// Truncates or right-pads a string to exactly `width` columns, for aligned
/// listing output.
pub fn pad_to_width(s: &str, width: usize) -> String {
    let fitted = truncate_to_width(s, width);
    let used = display_width(&fitted);
    let mut out = fitted.into_owned();
    out.extend(std::iter::repeat(' ').take(width.saturating_sub(used)));
    out
}

/// Prefix of `s` that fits in `columns` without splitting a character.
fn take_columns(s: &str, columns: usize) -> &str {
    let mut used = 0;
    for (idx, c) in s.char_indices() {
        let w = UnicodeWidthChar::width(c).unwrap_or(0);
        if used + w > columns {
            return &s[..idx];
        }
        used += w;
    }
    s
}

/// Flattens third-party text onto a single safe terminal line.
///
/// Catalog tags and uploader names are not under our control. Escape
/// sequences (ESC through the end of a CSI/OSC sequence) and other control
/// characters are dropped; tabs and newlines become single spaces.
///
/// Returns `Cow::Borrowed` for the common clean case.
///
/// ```
/// use streamshelf::util::sanitize_line;
///
/// assert_eq!(sanitize_line("nature, forest"), "nature, forest");
/// assert_eq!(sanitize_line("red\x1b[31m alert\nnow"), "red alert now");
/// ```
pub fn sanitize_line(s: &str) -> Cow<'_, str> {
    if !s.chars().any(char::is_control) {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\x1b' => match chars.peek() {
                Some('[') => {
                    chars.next();
                    // CSI ends at the first byte in 0x40..=0x7e
                    for n in chars.by_ref() {
                        if ('\x40'..='\x7e').contains(&n) {
                            break;
                        }
                    }
                }
                Some(']') => {
                    chars.next();
                    // OSC ends at BEL or ESC '\'
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
            },
            '\t' | '\n' | '\r' => {
                if !out.ends_with(' ') {
                    out.push(' ');
                }
            }
            c if c.is_control() => {}
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}
