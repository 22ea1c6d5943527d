/*!
Match flags and their source tracking.

Patterns can toggle flags inline, either for the rest of the enclosing
group with `(?im)` or for a sub-expression with `(?im:...)`. Every parsed
node records the [`FlagSet`] that was active when it was read, and the set
remembers which source character enabled each flag so that diagnostics can
point at the `i` in `(?i)` rather than at the node it affects.
*/

use crate::source::SourceChar;

bitflags::bitflags! {
    /// The flags understood by the dialect, one bit each.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct Flags: u16 {
        /// `i`: letters match both cases.
        const CASE_INSENSITIVE = 1 << 0;
        /// `m`: `^` and `$` also match at line boundaries.
        const MULTILINE = 1 << 1;
        /// `s`: `.` also matches line terminators.
        const DOT_ALL = 1 << 2;
        /// `d`: only `\n` terminates a line.
        const UNIX_LINES = 1 << 3;
        /// `x`: free-spacing mode with `#` comments.
        const COMMENTS = 1 << 4;
        /// `u`: case folding follows Unicode rules.
        const UNICODE_CASE = 1 << 5;
        /// `U`: the predefined character classes follow Unicode rules.
        const UNICODE_CHARACTER_CLASS = 1 << 6;
    }
}

impl Flags {
    /// Maps an inline flag letter to its flag bit.
    pub fn from_letter(ch: char) -> Option<Flags> {
        match ch {
            'i' => Some(Flags::CASE_INSENSITIVE),
            'm' => Some(Flags::MULTILINE),
            's' => Some(Flags::DOT_ALL),
            'd' => Some(Flags::UNIX_LINES),
            'x' => Some(Flags::COMMENTS),
            'u' => Some(Flags::UNICODE_CASE),
            'U' => Some(Flags::UNICODE_CHARACTER_CLASS),
            _ => None,
        }
    }
}

/// The set of flags active at one point of a pattern, along with the
/// source character that enabled each flag.
///
/// Flags enabled by the caller (rather than by an inline group) have no
/// source character.
#[derive(Clone, Debug, Default)]
pub struct FlagSet {
    mask: Flags,
    // At most one entry per flag bit. With seven flags total, a linear
    // scan beats a map.
    sources: Vec<(Flags, SourceChar)>,
}

impl FlagSet {
    pub(crate) fn new(mask: Flags) -> FlagSet {
        FlagSet { mask, sources: Vec::new() }
    }

    /// Returns true when the given flag is active.
    pub fn contains(&self, flag: Flags) -> bool {
        self.mask.contains(flag)
    }

    /// The raw bit mask of active flags.
    pub fn mask(&self) -> Flags {
        self.mask
    }

    /// The source character that enabled the given flag, if it was
    /// enabled by an inline flag group.
    pub fn source_of(&self, flag: Flags) -> Option<&SourceChar> {
        self.sources.iter().find(|(f, _)| *f == flag).map(|(_, sc)| sc)
    }

    pub(crate) fn enable(&mut self, flag: Flags, source: SourceChar) {
        self.mask.insert(flag);
        self.sources.retain(|(f, _)| *f != flag);
        self.sources.push((flag, source));
    }

    pub(crate) fn disable(&mut self, flags: Flags) {
        self.mask.remove(flags);
        self.sources.retain(|(f, _)| !flags.contains(*f));
    }
}
