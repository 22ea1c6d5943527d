/*!
Syntax errors collected during a parse.

Parsing never aborts. Every diagnosable problem in a pattern produces one
[`SyntaxError`] and a best-effort node, and the complete collection is
available on [`Parsed::errors`](crate::Parsed::errors) in the order the
problems were discovered.
*/

use core::fmt;

use crate::{
    ast::NodeId,
    source::{SourceChar, Span},
};

/// A recoverable syntax error found while parsing a pattern.
#[derive(Clone, Debug)]
pub struct SyntaxError {
    message: String,
    element: ErrorElement,
    locations: Vec<Span>,
}

/// The syntax element an error is reported against.
#[derive(Clone, Debug)]
pub enum ErrorElement {
    /// The zero-width pseudo-element just before the first character,
    /// used when a problem logically precedes everything in the pattern.
    OpeningQuote,
    /// The zero-width pseudo-element just after the last character.
    EndOfRegex(Span),
    /// A single source character.
    Character(SourceChar),
    /// A node of the syntax tree.
    Node(NodeId),
}

impl SyntaxError {
    pub(crate) fn new(
        message: String,
        element: ErrorElement,
        locations: Vec<Span>,
    ) -> SyntaxError {
        debug_assert!(!locations.is_empty());
        SyntaxError { message, element, locations }
    }

    /// A human readable description of the problem.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The element the error is reported against.
    pub fn offending_element(&self) -> &ErrorElement {
        &self.element
    }

    /// One or more text ranges involved in the problem. The first range
    /// is the primary location.
    pub fn locations(&self) -> &[Span] {
        &self.locations
    }

    /// The primary location of the problem.
    pub fn span(&self) -> Span {
        self.locations[0]
    }
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for SyntaxError {}
