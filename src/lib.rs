/*!
A regular expression front end for source code analyzers.

This crate parses patterns written in a Java-style dialect into a syntax
tree, and threads an automaton over the same nodes so that analyses can
reason about matching behavior without a second data structure. It is a
front end only: nothing here executes a match against input text.

Two properties set it apart from a regex engine's parser:

* **Parsing is total.** Malformed patterns do not abort the parse.
  Every problem becomes a [`SyntaxError`] with a message and precise
  source spans, the damaged construct degrades to a best-effort node,
  and parsing continues. Even `x**)(` produces a complete tree. This is
  what an analyzer needs: the pattern under inspection is exactly as
  broken as the author wrote it, and diagnosing the first error well
  means seeing everything around it.

* **The tree is the automaton.** Every node carries a successor list
  and an incoming transition type, so the result can be walked as a
  Thompson-style state graph, from [`Parsed::start_state`] to the single
  [`Parsed::final_state`]. A handful of synthetic states (loop-backs,
  group ends, lookaround bookkeeping) are added during wiring.

# Example: walking the tree

```
use regex_frontend::parse;

let parsed = parse("(a|b)*c");
assert!(parsed.errors().is_empty());
assert_eq!(parsed.group_count(), 1);
assert_eq!(parsed.text(parsed.group(1).unwrap()), "(a|b)");
```

# Example: diagnostics

```
use regex_frontend::parse;

let parsed = parse("x**");
assert_eq!(parsed.errors().len(), 1);
assert_eq!(parsed.errors()[0].to_string(), "Unexpected quantifier '*'");
```

# Example: the automaton view

```
use regex_frontend::parse;

let parsed = parse("a|b");
let start = parsed.start_state();
// Both alternatives lead straight to the final state.
for &alt in parsed.node(start).successors() {
    assert_eq!(parsed.node(alt).successors(), &[parsed.final_state()]);
}
```

# Flags

The dialect's inline flags (`(?imsdxuU)` and `(?flags:...)`) are tracked
per node: [`Node::active_flags`] returns the flags that were in force
where the node was read, including which source character enabled each
one. Flags for the whole pattern can be passed to [`parse_with_flags`].

# Escapes

The lexer decodes `\n`-style escapes, `\cX`, octal `\0n..`, hex `\xhh`
and `\x{...}`, and `\Q...\E` quotations before the grammar runs, so an
escaped metacharacter can never act as a metacharacter. Escapes whose
meaning depends on context, such as `\d`, `\b` and `\1`, are resolved by
the parser. Host-language string escapes are assumed to have been
resolved by the caller; the input here is the pattern as the regex
engine would see it.
*/

#![forbid(unsafe_code)]
#![warn(missing_debug_implementations)]

#[macro_use]
mod debug;

mod ast;
mod error;
mod flags;
mod parse;
mod source;

pub use crate::{
    ast::{
        walk, BackRefKind, BoundaryKind, MiscEscapeKind, Modifier, Node, NodeId, NodeKind,
        Parsed, Quantifier, SimpleQuantifierKind, TransitionType, Visitor,
    },
    error::{ErrorElement, SyntaxError},
    flags::{FlagSet, Flags},
    source::{SourceChar, Span},
};

/// Parses a pattern with no initial flags.
///
/// This never fails; inspect [`Parsed::errors`] to find out whether the
/// pattern was well formed.
pub fn parse(pattern: &str) -> Parsed {
    parse_with_flags(pattern, Flags::empty())
}

/// Parses a pattern with the given flags already in force, as if the
/// pattern started with an inline flag group.
pub fn parse_with_flags(pattern: &str, flags: Flags) -> Parsed {
    crate::parse::parse_pattern(pattern, flags)
}
