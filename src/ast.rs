/*!
The syntax tree and the automaton view layered over it.

Parsing produces a single arena of [`Node`]s. Tree nodes double as
automaton states: every node carries a successor list and an incoming
transition type, so analyzers can either walk the tree with a [`Visitor`]
or simulate matching by following successors from the start state. A few
states are synthetic, such as the final state and the loop-back states of
repetitions, and exist only in the graph.

Successor order is meaningful. It is the order a backtracking matcher
would try the branches, so greedy repetitions list their body first and
reluctant ones list their continuation first.
*/

use std::collections::HashMap;

use core::fmt;

use crate::{
    error::SyntaxError,
    flags::{FlagSet, Flags},
    source::Span,
};

/// The identifier of a node in the arena of a [`Parsed`] pattern.
pub type NodeId = u32;

/// How a state is entered when the graph is walked like an automaton.
///
/// The type is a property of the state being entered, so the type of the
/// edge `A -> B` is `B`'s incoming transition type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransitionType {
    /// Entering the state consumes one input character.
    Character,
    /// Entering the state consumes no input.
    Epsilon,
    /// Entering the state consumes whatever the referenced group matched.
    BackReference,
    /// The state inverts the outcome of the sub-automaton behind it.
    Negation,
    /// Leaving a lookaround body, which rewinds the input position.
    LookaroundBacktracking,
}

/// The shape of a `*`, `+` or `?` quantifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SimpleQuantifierKind {
    Star,
    Plus,
    QuestionMark,
}

/// The matching strategy of a quantifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Modifier {
    Greedy,
    Reluctant,
    Possessive,
}

/// A quantifier as written, including enough detail to reproduce its
/// exact source form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Quantifier {
    Simple {
        kind: SimpleQuantifierKind,
        modifier: Modifier,
        span: Span,
    },
    Curly {
        min: u32,
        /// `None` for an open-ended `{n,}`.
        max: Option<u32>,
        /// True when the upper bound was left out, as in `{n,}`.
        open_ended: bool,
        /// True when written with a single number, as in `{n}`. This is
        /// distinct from `{n,n}`, which has the same bounds.
        single_number: bool,
        modifier: Modifier,
        span: Span,
    },
}

impl Quantifier {
    /// The smallest number of repetitions the quantifier allows.
    pub fn minimum(&self) -> u32 {
        match *self {
            Quantifier::Simple { kind: SimpleQuantifierKind::Plus, .. } => 1,
            Quantifier::Simple { .. } => 0,
            Quantifier::Curly { min, .. } => min,
        }
    }

    /// The largest number of repetitions, or `None` when unbounded.
    pub fn maximum(&self) -> Option<u32> {
        match *self {
            Quantifier::Simple { kind: SimpleQuantifierKind::QuestionMark, .. } => Some(1),
            Quantifier::Simple { .. } => None,
            Quantifier::Curly { max, .. } => max,
        }
    }

    pub fn modifier(&self) -> Modifier {
        match *self {
            Quantifier::Simple { modifier, .. } => modifier,
            Quantifier::Curly { modifier, .. } => modifier,
        }
    }

    pub fn span(&self) -> Span {
        match *self {
            Quantifier::Simple { span, .. } => span,
            Quantifier::Curly { span, .. } => span,
        }
    }
}

/// An anchor or zero-width assertion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoundaryKind {
    /// `^`
    LineStart,
    /// `$`
    LineEnd,
    /// `\b`
    Word,
    /// `\B`
    NonWord,
    /// `\A`
    InputStart,
    /// `\z`
    InputEnd,
    /// `\Z`
    InputEndFinalTerminator,
    /// `\G`
    PreviousMatchEnd,
    /// `\b{g}`
    UnicodeExtendedGraphemeCluster,
}

/// Escapes that match text without being character classes or anchors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MiscEscapeKind {
    /// `\N{NAME}`
    NamedCharacter,
    /// `\X`
    AnyGrapheme,
    /// `\R`
    LineBreak,
}

/// What a back reference points at, as written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackRefKind {
    Number(u32),
    Name(String),
}

/// The kind of a node. Tree nodes come first, then the synthetic
/// automaton states, then the two pseudo-elements.
#[derive(Clone, Debug)]
pub enum NodeKind {
    /// A concatenation. Only materialized for zero or at least two
    /// items; a single quantified atom stands for itself.
    Sequence { items: Vec<NodeId> },
    /// `a|b|c`. The operator spans cover the `|` characters.
    Disjunction { alternatives: Vec<NodeId>, operators: Vec<Span> },
    /// `(...)` or `(?<name>...)`. Numbered in order of the opening
    /// parenthesis, starting at 1.
    Capturing { number: u32, name: Option<String>, inner: NodeId },
    /// `(?:...)`, `(?flags:...)` or a body-less `(?flags)`.
    NonCapturing { enabled: Flags, disabled: Flags, inner: Option<NodeId> },
    /// `(?>...)`
    Atomic { inner: NodeId },
    /// `(?=...)`, `(?!...)`, `(?<=...)` or `(?<!...)`.
    LookAround { positive: bool, ahead: bool, inner: NodeId },
    /// A quantified element.
    Repetition { inner: NodeId, quantifier: Quantifier },
    /// A single literal character, possibly written as an escape.
    Character { ch: char, escape: bool },
    /// `.`
    Dot,
    /// `a-z` inside a character class.
    CharacterRange { lower: char, upper: char },
    /// `[...]` or `[^...]`.
    CharacterClass { negated: bool, content: NodeId },
    /// The juxtaposed elements of a class body.
    ClassUnion { items: Vec<NodeId> },
    /// `[a&&b]`. The operator spans cover the `&&` operators.
    ClassIntersection { operands: Vec<NodeId>, operators: Vec<Span> },
    /// `\d`, `\W`, `\p{Lu}` and the rest of the escape classes. The
    /// letter is as written, `property` is the name inside `\p{...}`.
    EscapedClass { letter: char, property: Option<String>, negated: bool },
    Boundary(BoundaryKind),
    /// `\1` or `\k<name>`. `group` is filled in after the whole pattern
    /// has been parsed, and stays `None` for dangling references.
    BackReference { kind: BackRefKind, group: Option<NodeId> },
    MiscEscape { kind: MiscEscapeKind, name: Option<String> },

    /// The single accepting state every path ends in.
    Final,
    /// The state at the end of a repetition body that loops back to the
    /// repetition.
    EndOfRepetition,
    /// Marks where a capturing group's match would be recorded.
    EndOfCapturingGroup { number: u32 },
    /// The state that rewinds the input after a lookaround body.
    EndOfLookaround,
    /// The entry state of a lookbehind body.
    StartOfLookBehind,
    /// Inverts the outcome of a negative lookaround body.
    NegationState,

    /// The pseudo-element just before the first character.
    OpeningQuote,
    /// The pseudo-element just after the last character.
    EndOfRegex,
}

impl NodeKind {
    /// A short label for graph dumps.
    fn label(&self) -> String {
        match self {
            NodeKind::Sequence { .. } => "seq".to_string(),
            NodeKind::Disjunction { .. } => "alt".to_string(),
            NodeKind::Capturing { number, name: None, .. } => format!("group {}", number),
            NodeKind::Capturing { number, name: Some(name), .. } => {
                format!("group {} <{}>", number, name)
            }
            NodeKind::NonCapturing { inner: None, .. } => "flags".to_string(),
            NodeKind::NonCapturing { .. } => "non-capturing".to_string(),
            NodeKind::Atomic { .. } => "atomic".to_string(),
            NodeKind::LookAround { positive, ahead, .. } => format!(
                "look-{} ({})",
                if *ahead { "ahead" } else { "behind" },
                if *positive { "positive" } else { "negative" },
            ),
            NodeKind::Repetition { .. } => "repetition".to_string(),
            NodeKind::Character { ch, .. } => format!("char {:?}", ch),
            NodeKind::Dot => "dot".to_string(),
            NodeKind::CharacterRange { lower, upper } => {
                format!("range {:?}-{:?}", lower, upper)
            }
            NodeKind::CharacterClass { negated: false, .. } => "class".to_string(),
            NodeKind::CharacterClass { negated: true, .. } => "negated class".to_string(),
            NodeKind::ClassUnion { .. } => "class-union".to_string(),
            NodeKind::ClassIntersection { .. } => "class-intersection".to_string(),
            NodeKind::EscapedClass { letter, property: None, .. } => {
                format!("escape-class \\{}", letter)
            }
            NodeKind::EscapedClass { letter, property: Some(p), .. } => {
                format!("escape-class \\{}{{{}}}", letter, p)
            }
            NodeKind::Boundary(kind) => format!("boundary {:?}", kind),
            NodeKind::BackReference { kind: BackRefKind::Number(n), .. } => {
                format!("backref \\{}", n)
            }
            NodeKind::BackReference { kind: BackRefKind::Name(name), .. } => {
                format!("backref \\k<{}>", name)
            }
            NodeKind::MiscEscape { kind, .. } => format!("escape {:?}", kind),
            NodeKind::Final => "FINAL".to_string(),
            NodeKind::EndOfRepetition => "end-of-repetition".to_string(),
            NodeKind::EndOfCapturingGroup { number } => format!("end-of-group {}", number),
            NodeKind::EndOfLookaround => "end-of-lookaround".to_string(),
            NodeKind::StartOfLookBehind => "start-of-lookbehind".to_string(),
            NodeKind::NegationState => "negation".to_string(),
            NodeKind::OpeningQuote => "opening-quote".to_string(),
            NodeKind::EndOfRegex => "end-of-regex".to_string(),
        }
    }
}

/// One node of the arena. See the module docs for how tree nodes double
/// as automaton states.
#[derive(Clone, Debug)]
pub struct Node {
    pub(crate) kind: NodeKind,
    pub(crate) span: Span,
    pub(crate) flags: FlagSet,
    pub(crate) incoming: TransitionType,
    pub(crate) successors: Vec<NodeId>,
}

impl Node {
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn span(&self) -> Span {
        self.span
    }

    /// The flags that were active when this node was read.
    pub fn active_flags(&self) -> &FlagSet {
        &self.flags
    }

    /// The transition type of every edge leading into this state.
    pub fn incoming_transition(&self) -> TransitionType {
        self.incoming
    }

    /// The states a matcher may move to from here, in the order a
    /// backtracking matcher would try them.
    pub fn successors(&self) -> &[NodeId] {
        &self.successors
    }
}

/// The immutable result of parsing one pattern: the node arena, the
/// group tables and every syntax error that was found.
pub struct Parsed {
    pub(crate) pattern: String,
    pub(crate) nodes: Vec<Node>,
    pub(crate) root: NodeId,
    pub(crate) final_state: NodeId,
    pub(crate) opening_quote: NodeId,
    pub(crate) end_of_regex: NodeId,
    pub(crate) errors: Vec<SyntaxError>,
    pub(crate) groups: Vec<Option<NodeId>>,
    pub(crate) names: HashMap<String, u32>,
    pub(crate) initial_flags: Flags,
}

impl Parsed {
    /// The pattern text that was parsed.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// The root of the syntax tree. Never absent, even for patterns
    /// riddled with errors.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// The start state of the automaton view. This is the root node.
    pub fn start_state(&self) -> NodeId {
        self.root
    }

    /// The single accepting state.
    pub fn final_state(&self) -> NodeId {
        self.final_state
    }

    /// The pseudo-element just before the first character, spanning
    /// `-1..0`. Useful as an anchor for problems that logically precede
    /// the whole pattern. It has no text; [`Parsed::text`] panics on it.
    pub fn opening_quote(&self) -> NodeId {
        self.opening_quote
    }

    /// The pseudo-element just after the last character.
    pub fn end_of_regex(&self) -> NodeId {
        self.end_of_regex
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id as usize]
    }

    /// The number of nodes in the arena, including synthetic states.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// All syntax errors, in the order they were discovered.
    pub fn errors(&self) -> &[SyntaxError] {
        &self.errors
    }

    /// The capturing group with the given number, counting from 1.
    pub fn group(&self, number: u32) -> Option<NodeId> {
        if number == 0 {
            return None;
        }
        self.groups.get(number as usize - 1).copied().flatten()
    }

    /// The number of the named group, if the name is defined.
    pub fn group_number(&self, name: &str) -> Option<u32> {
        self.names.get(name).copied()
    }

    /// How many capturing groups the pattern opens.
    pub fn group_count(&self) -> u32 {
        self.groups.len() as u32
    }

    /// The flags the parse started with.
    pub fn initial_flags(&self) -> Flags {
        self.initial_flags
    }

    /// The raw pattern text covered by a node.
    ///
    /// # Panics
    ///
    /// Panics when called on the opening-quote pseudo-element, which
    /// sits before the first character and has no text.
    pub fn text(&self, id: NodeId) -> &str {
        let node = &self.nodes[id as usize];
        assert!(
            !matches!(node.kind, NodeKind::OpeningQuote),
            "the opening-quote pseudo-element has no text",
        );
        &self.pattern[node.span.begin as usize..node.span.end as usize]
    }
}

impl fmt::Debug for Parsed {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "Parsed(")?;
        writeln!(f, "pattern: {:?}", self.pattern)?;
        for (i, node) in self.nodes.iter().enumerate() {
            let marker = if i == self.root as usize { '>' } else { ' ' };
            writeln!(
                f,
                "{}{:03}: {} {} {:?} => {:?}",
                marker,
                i,
                node.kind.label(),
                node.span,
                node.incoming,
                node.successors,
            )?;
        }
        for err in &self.errors {
            writeln!(f, "error: {} at {}", err.message(), err.span())?;
        }
        write!(f, ")")
    }
}

/// A traversal of the syntax tree with a no-op default for every kind of
/// node. Implementors override only the kinds they care about and let
/// [`walk`] drive the traversal in source order.
pub trait Visitor {
    fn visit_sequence(&mut self, _parsed: &Parsed, _id: NodeId) {}
    fn visit_disjunction(&mut self, _parsed: &Parsed, _id: NodeId) {}
    fn visit_capturing(&mut self, _parsed: &Parsed, _id: NodeId) {}
    fn visit_non_capturing(&mut self, _parsed: &Parsed, _id: NodeId) {}
    fn visit_atomic(&mut self, _parsed: &Parsed, _id: NodeId) {}
    fn visit_look_around(&mut self, _parsed: &Parsed, _id: NodeId) {}
    fn visit_repetition(&mut self, _parsed: &Parsed, _id: NodeId) {}
    fn visit_character(&mut self, _parsed: &Parsed, _id: NodeId) {}
    fn visit_dot(&mut self, _parsed: &Parsed, _id: NodeId) {}
    fn visit_character_range(&mut self, _parsed: &Parsed, _id: NodeId) {}
    fn visit_character_class(&mut self, _parsed: &Parsed, _id: NodeId) {}
    fn visit_class_union(&mut self, _parsed: &Parsed, _id: NodeId) {}
    fn visit_class_intersection(&mut self, _parsed: &Parsed, _id: NodeId) {}
    fn visit_escaped_class(&mut self, _parsed: &Parsed, _id: NodeId) {}
    fn visit_boundary(&mut self, _parsed: &Parsed, _id: NodeId) {}
    fn visit_back_reference(&mut self, _parsed: &Parsed, _id: NodeId) {}
    fn visit_misc_escape(&mut self, _parsed: &Parsed, _id: NodeId) {}
}

/// Drives a [`Visitor`] over the tree rooted at `id`, visiting each node
/// before its children and the children in source order. Synthetic
/// states and pseudo-elements are not part of the tree and are skipped.
pub fn walk<V: Visitor>(visitor: &mut V, parsed: &Parsed, id: NodeId) {
    match parsed.node(id).kind() {
        NodeKind::Sequence { items } => {
            visitor.visit_sequence(parsed, id);
            for &item in items {
                walk(visitor, parsed, item);
            }
        }
        NodeKind::Disjunction { alternatives, .. } => {
            visitor.visit_disjunction(parsed, id);
            for &alt in alternatives {
                walk(visitor, parsed, alt);
            }
        }
        NodeKind::Capturing { inner, .. } => {
            visitor.visit_capturing(parsed, id);
            walk(visitor, parsed, *inner);
        }
        NodeKind::NonCapturing { inner, .. } => {
            visitor.visit_non_capturing(parsed, id);
            if let Some(inner) = inner {
                walk(visitor, parsed, *inner);
            }
        }
        NodeKind::Atomic { inner } => {
            visitor.visit_atomic(parsed, id);
            walk(visitor, parsed, *inner);
        }
        NodeKind::LookAround { inner, .. } => {
            visitor.visit_look_around(parsed, id);
            walk(visitor, parsed, *inner);
        }
        NodeKind::Repetition { inner, .. } => {
            visitor.visit_repetition(parsed, id);
            walk(visitor, parsed, *inner);
        }
        NodeKind::Character { .. } => visitor.visit_character(parsed, id),
        NodeKind::Dot => visitor.visit_dot(parsed, id),
        NodeKind::CharacterRange { .. } => visitor.visit_character_range(parsed, id),
        NodeKind::CharacterClass { content, .. } => {
            visitor.visit_character_class(parsed, id);
            walk(visitor, parsed, *content);
        }
        NodeKind::ClassUnion { items } => {
            visitor.visit_class_union(parsed, id);
            for &item in items {
                walk(visitor, parsed, item);
            }
        }
        NodeKind::ClassIntersection { operands, .. } => {
            visitor.visit_class_intersection(parsed, id);
            for &operand in operands {
                walk(visitor, parsed, operand);
            }
        }
        NodeKind::EscapedClass { .. } => visitor.visit_escaped_class(parsed, id),
        NodeKind::Boundary(_) => visitor.visit_boundary(parsed, id),
        NodeKind::BackReference { .. } => visitor.visit_back_reference(parsed, id),
        NodeKind::MiscEscape { .. } => visitor.visit_misc_escape(parsed, id),
        NodeKind::Final
        | NodeKind::EndOfRepetition
        | NodeKind::EndOfCapturingGroup { .. }
        | NodeKind::EndOfLookaround
        | NodeKind::StartOfLookBehind
        | NodeKind::NegationState
        | NodeKind::OpeningQuote
        | NodeKind::EndOfRegex => {}
    }
}
