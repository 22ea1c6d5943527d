/*!
Pattern text handling: spans, decoded characters and the lexer.

The lexer decodes the dialect's escape sequences up front and hands the
parser a flat sequence of [`SourceChar`]s. Each one remembers the span of
raw text it came from and whether it was written as an escape, because an
escaped metacharacter must never act as a metacharacter again. Escapes
whose meaning depends on grammar context (`\d`, `\b`, `\1`, ...) are left
undecoded: the backslash and the following character each become their own
token and the parser dispatches on the pair.
*/

use core::fmt;

/// The decode result for invalid escapes. A placeholder keeps the token
/// stream aligned with the source text so follow-up diagnostics still
/// point at the right offsets.
const REPLACEMENT: char = '\u{FFFD}';

/// A half-open range of offsets into the pattern text.
///
/// Offsets are zero based and signed. The opening-quote pseudo-element
/// that anchors "before the first character" diagnostics sits at `-1..0`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Span {
    pub begin: i32,
    pub end: i32,
}

impl Span {
    /// The zero-width location just before the first character.
    pub const OPENING_QUOTE: Span = Span { begin: -1, end: 0 };

    pub fn new(begin: i32, end: i32) -> Span {
        Span { begin, end }
    }

    pub(crate) fn from_offsets(begin: usize, end: usize) -> Span {
        // Patterns are in-memory strings, so offsets always fit in i32.
        Span::new(begin as i32, end as i32)
    }

    pub fn len(&self) -> usize {
        (self.end - self.begin) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.begin == self.end
    }

    /// The smallest span covering both `self` and `other`.
    pub fn merge(&self, other: Span) -> Span {
        Span::new(self.begin.min(other.begin), self.end.max(other.end))
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}..{}", self.begin, self.end)
    }
}

/// One decoded pattern character.
///
/// This is either a plain source character or the value of an escape
/// sequence such as `\n`, `\x{1F600}` or a character inside `\Q...\E`,
/// together with the span of raw text that produced it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceChar {
    ch: char,
    span: Span,
    escape: bool,
}

impl SourceChar {
    pub(crate) fn new(ch: char, span: Span, escape: bool) -> SourceChar {
        SourceChar { ch, span, escape }
    }

    /// The decoded character value.
    pub fn ch(&self) -> char {
        self.ch
    }

    /// The range of raw pattern text this character came from.
    pub fn span(&self) -> Span {
        self.span
    }

    /// True when this character was written as an escape sequence or
    /// inside a `\Q...\E` quotation. Such characters never act as
    /// metacharacters.
    pub fn is_escape(&self) -> bool {
        self.escape
    }
}

/// A lexed character plus an error to report if and when the parser
/// consumes it. Tying lexical errors to their token keeps diagnostics in
/// discovery order even though decoding happens up front.
pub(crate) struct Token {
    pub(crate) sc: SourceChar,
    pub(crate) error: Option<String>,
}

pub(crate) struct Lexed {
    pub(crate) tokens: Vec<Token>,
    /// An error discovered at the very end of the input, such as an
    /// unterminated `\Q` quotation.
    pub(crate) eof_error: Option<(String, Span)>,
}

pub(crate) fn tokenize(pattern: &str) -> Lexed {
    let lexer = Lexer {
        pattern,
        pos: 0,
        quoted: false,
        tokens: Vec::new(),
        eof_error: None,
    };
    lexer.run()
}

struct Lexer<'p> {
    pattern: &'p str,
    pos: usize,
    quoted: bool,
    tokens: Vec<Token>,
    eof_error: Option<(String, Span)>,
}

impl Lexer<'_> {
    fn run(mut self) -> Lexed {
        while let Some(ch) = self.peek() {
            if self.quoted {
                if ch == '\\' && self.peek_nth(1) == Some('E') {
                    self.quoted = false;
                    self.pos += 2;
                } else {
                    let start = self.pos;
                    self.pos += ch.len_utf8();
                    self.push(ch, start, true, None);
                }
            } else if ch == '\\' {
                self.escape();
            } else {
                let start = self.pos;
                self.pos += ch.len_utf8();
                self.push(ch, start, false, None);
            }
        }
        if self.quoted {
            let end = self.pattern.len();
            self.eof_error = Some((
                "Expected '\\E', but found the end of the regex".to_string(),
                Span::from_offsets(end, end),
            ));
        }
        Lexed { tokens: self.tokens, eof_error: self.eof_error }
    }

    fn peek(&self) -> Option<char> {
        self.pattern[self.pos..].chars().next()
    }

    fn peek_nth(&self, n: usize) -> Option<char> {
        self.pattern[self.pos..].chars().nth(n)
    }

    fn push(&mut self, ch: char, start: usize, escape: bool, error: Option<String>) {
        let span = Span::from_offsets(start, self.pos);
        self.tokens.push(Token { sc: SourceChar::new(ch, span, escape), error });
    }

    fn escape(&mut self) {
        let start = self.pos;
        self.pos += 1; // the backslash
        let Some(ch) = self.peek() else {
            self.push(
                '\\',
                start,
                true,
                Some("Expected an escape sequence, but found the end of the regex".to_string()),
            );
            return;
        };
        match ch {
            'Q' => {
                self.quoted = true;
                self.pos += 1;
            }
            'E' => {
                self.pos += 1;
                self.push('E', start, true, Some("Unexpected '\\E'".to_string()));
            }
            'n' => self.simple('\n'),
            't' => self.simple('\t'),
            'r' => self.simple('\r'),
            'f' => self.simple('\u{0C}'),
            'a' => self.simple('\u{07}'),
            'e' => self.simple('\u{1B}'),
            'c' => self.control(start),
            '0' => self.octal(start),
            'x' => self.hex(start),
            c if c.is_ascii_alphanumeric() => {
                // Context dependent: the parser dispatches on the pair.
                self.push('\\', start, false, None);
            }
            c => {
                // Identity escape of a non-alphanumeric character.
                self.pos += c.len_utf8();
                self.push(c, start, true, None);
            }
        }
    }

    fn simple(&mut self, decoded: char) {
        let start = self.pos - 1;
        self.pos += 1;
        self.push(decoded, start, true, None);
    }

    /// `\cX` denotes the control character whose value is `X ^ 0x40`.
    fn control(&mut self, start: usize) {
        self.pos += 1; // 'c'
        match self.peek() {
            None => self.push(
                REPLACEMENT,
                start,
                true,
                Some("Expected any character, but found the end of the regex".to_string()),
            ),
            Some(x) => {
                self.pos += x.len_utf8();
                match char::from_u32((x as u32) ^ 0x40) {
                    Some(c) => self.push(c, start, true, None),
                    None => self.push(
                        REPLACEMENT,
                        start,
                        true,
                        Some(format!("Invalid control character '{}'", x)),
                    ),
                }
            }
        }
    }

    /// `\0n`, `\0nn` or `\0mnn` with `m` at most 3, so the value never
    /// exceeds 0xFF.
    fn octal(&mut self, start: usize) {
        self.pos += 1; // '0'
        let mut value: u32 = 0;
        let mut digits = 0;
        while digits < 3 {
            match self.peek() {
                Some(d @ '0'..='7') => {
                    let next = value * 8 + d.to_digit(8).unwrap();
                    if next > 0xFF {
                        break;
                    }
                    value = next;
                    digits += 1;
                    self.pos += 1;
                }
                _ => break,
            }
        }
        if digits == 0 {
            let msg = match self.peek() {
                Some(c) => format!("Expected octal digit, but found '{}'", c),
                None => "Expected octal digit, but found the end of the regex".to_string(),
            };
            self.push(REPLACEMENT, start, true, Some(msg));
        } else {
            self.push(char::from_u32(value).unwrap_or(REPLACEMENT), start, true, None);
        }
    }

    /// `\xhh` with exactly two digits, or `\x{h...h}` with any number of
    /// digits naming a Unicode code point.
    fn hex(&mut self, start: usize) {
        self.pos += 1; // 'x'
        if self.peek() == Some('{') {
            self.pos += 1;
            let mut value: u32 = 0;
            let mut digits = 0;
            let mut bad: Option<String> = None;
            loop {
                match self.peek() {
                    None => {
                        bad.get_or_insert(
                            "Expected '}', but found the end of the regex".to_string(),
                        );
                        break;
                    }
                    Some('}') => {
                        self.pos += 1;
                        break;
                    }
                    Some(d) if d.is_ascii_hexdigit() => {
                        value = value
                            .saturating_mul(16)
                            .saturating_add(d.to_digit(16).unwrap());
                        digits += 1;
                        self.pos += 1;
                    }
                    Some(d) => {
                        bad.get_or_insert(format!(
                            "Expected hexadecimal digit or '}}', but found '{}'",
                            d
                        ));
                        self.pos += d.len_utf8();
                    }
                }
            }
            if digits == 0 {
                bad.get_or_insert("Expected hexadecimal digit, but found '}'".to_string());
            }
            match (bad, char::from_u32(value)) {
                (Some(msg), _) => self.push(REPLACEMENT, start, true, Some(msg)),
                (None, Some(c)) => self.push(c, start, true, None),
                (None, None) => self.push(
                    REPLACEMENT,
                    start,
                    true,
                    Some(format!("Invalid Unicode code point 0x{:X}", value)),
                ),
            }
        } else {
            let mut value: u32 = 0;
            for _ in 0..2 {
                match self.peek() {
                    Some(d) if d.is_ascii_hexdigit() => {
                        value = value * 16 + d.to_digit(16).unwrap();
                        self.pos += 1;
                    }
                    found => {
                        let msg = match found {
                            Some(c) => format!("Expected hexadecimal digit, but found '{}'", c),
                            None => "Expected hexadecimal digit, but found the end of the regex"
                                .to_string(),
                        };
                        self.push(REPLACEMENT, start, true, Some(msg));
                        return;
                    }
                }
            }
            self.push(char::from_u32(value).unwrap_or(REPLACEMENT), start, true, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chars(pattern: &str) -> Vec<(char, bool)> {
        tokenize(pattern).tokens.iter().map(|t| (t.sc.ch(), t.sc.is_escape())).collect()
    }

    fn first_error(pattern: &str) -> String {
        tokenize(pattern)
            .tokens
            .into_iter()
            .find_map(|t| t.error)
            .expect("expected a lexical error")
    }

    #[test]
    fn plain_characters_pass_through() {
        assert_eq!(chars("ab"), vec![('a', false), ('b', false)]);
        let lexed = tokenize("ab");
        assert_eq!(lexed.tokens[1].sc.span(), Span::new(1, 2));
    }

    #[test]
    fn simple_escapes_decode() {
        assert_eq!(chars(r"\n\t\r\f\a\e"), vec![
            ('\n', true),
            ('\t', true),
            ('\r', true),
            ('\u{0C}', true),
            ('\u{07}', true),
            ('\u{1B}', true),
        ]);
        let lexed = tokenize(r"a\nb");
        assert_eq!(lexed.tokens[1].sc.span(), Span::new(1, 3));
    }

    #[test]
    fn identity_escapes_decode() {
        assert_eq!(chars(r"\*\-\]\\"), vec![
            ('*', true),
            ('-', true),
            (']', true),
            ('\\', true),
        ]);
    }

    #[test]
    fn context_dependent_escapes_stay_split() {
        // `\d` must reach the parser as backslash plus 'd'.
        assert_eq!(chars(r"\d"), vec![('\\', false), ('d', false)]);
        assert_eq!(chars(r"\1"), vec![('\\', false), ('1', false)]);
    }

    #[test]
    fn control_escapes_decode() {
        assert_eq!(chars(r"\cA"), vec![('\u{01}', true)]);
        assert_eq!(chars(r"\cJ"), vec![('\n', true)]);
        let lexed = tokenize(r"\cA");
        assert_eq!(lexed.tokens[0].sc.span(), Span::new(0, 3));
    }

    #[test]
    fn octal_escapes_decode() {
        assert_eq!(chars(r"\0101"), vec![('A', true)]);
        assert_eq!(chars(r"\07"), vec![('\u{07}', true)]);
        // The value is capped at 0xFF, so the fourth digit is a literal.
        assert_eq!(chars(r"\0777"), vec![('\u{3F}', true), ('7', false)]);
    }

    #[test]
    fn octal_without_digits_is_an_error() {
        assert_eq!(first_error(r"\0x"), "Expected octal digit, but found 'x'");
        assert_eq!(chars(r"\0x")[0], (REPLACEMENT, true));
    }

    #[test]
    fn fixed_width_hex_decodes() {
        assert_eq!(chars(r"\x41"), vec![('A', true)]);
        assert_eq!(
            first_error(r"\x4"),
            "Expected hexadecimal digit, but found the end of the regex"
        );
    }

    #[test]
    fn braced_hex_decodes() {
        assert_eq!(chars(r"\x{1F600}"), vec![('\u{1F600}', true)]);
        assert_eq!(chars(r"\x{41}"), vec![('A', true)]);
        assert_eq!(first_error(r"\x{}"), "Expected hexadecimal digit, but found '}'");
        assert_eq!(
            first_error(r"\x{12"),
            "Expected '}', but found the end of the regex"
        );
    }

    #[test]
    fn surrogate_code_points_are_rejected() {
        assert_eq!(first_error(r"\x{D800}"), "Invalid Unicode code point 0xD800");
    }

    #[test]
    fn quoting_suppresses_metacharacters() {
        assert_eq!(chars(r"\Qa*b\Ec"), vec![
            ('a', true),
            ('*', true),
            ('b', true),
            ('c', false),
        ]);
    }

    #[test]
    fn unterminated_quote_is_reported_at_the_end() {
        let lexed = tokenize(r"\Qab");
        assert_eq!(lexed.tokens.len(), 2);
        let (msg, span) = lexed.eof_error.unwrap();
        assert_eq!(msg, "Expected '\\E', but found the end of the regex");
        assert_eq!(span, Span::new(4, 4));
    }

    #[test]
    fn dangling_backslash_is_an_error() {
        assert_eq!(
            first_error("\\"),
            "Expected an escape sequence, but found the end of the regex"
        );
    }

    #[test]
    fn spans_survive_multibyte_characters() {
        let lexed = tokenize("é*");
        assert_eq!(lexed.tokens[0].sc.span(), Span::new(0, 2));
        assert_eq!(lexed.tokens[1].sc.span(), Span::new(2, 3));
    }
}
