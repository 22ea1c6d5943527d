/*!
The recursive descent parser.

The parser never fails. Every malformed construct produces a
[`SyntaxError`] and a best-effort node, so downstream analyses always get
a complete tree and a complete state graph even for garbage input.

Graph construction is interleaved with parsing: tree nodes are created
with empty successor lists, and once the whole pattern has been read,
`set_continuation` threads each node to the state a matcher would move to
next, creating the synthetic loop-back and bookkeeping states on the way.
*/

use std::collections::HashMap;

use crate::{
    ast::{
        BackRefKind, BoundaryKind, MiscEscapeKind, Modifier, Node, NodeId, NodeKind, Parsed,
        Quantifier, SimpleQuantifierKind, TransitionType,
    },
    error::{ErrorElement, SyntaxError},
    flags::{FlagSet, Flags},
    source::{tokenize, Lexed, SourceChar, Span, Token},
};

fn expected(what: &str, found: Option<&SourceChar>) -> String {
    match found {
        Some(sc) => format!("Expected {}, but found '{}'", what, sc.ch()),
        None => format!("Expected {}, but found the end of the regex", what),
    }
}

pub(crate) fn parse_pattern(pattern: &str, initial: Flags) -> Parsed {
    debug!("parsing pattern {:?}", pattern);
    let Lexed { tokens, eof_error } = tokenize(pattern);
    let pattern_len = pattern.len() as i32;
    let mut p = Parser {
        pattern,
        pattern_len,
        tokens,
        idx: 0,
        last_end: 0,
        nodes: Vec::new(),
        errors: Vec::new(),
        flags: FlagSet::new(initial),
        scopes: Vec::new(),
        groups: Vec::new(),
        names: HashMap::new(),
        backrefs: Vec::new(),
    };
    let opening_quote =
        p.add_node(NodeKind::OpeningQuote, Span::OPENING_QUOTE, TransitionType::Epsilon);
    let end_of_regex = p.add_node(
        NodeKind::EndOfRegex,
        Span::new(pattern_len, pattern_len),
        TransitionType::Epsilon,
    );
    p.skip_space();
    let root = p.parse_top();
    let flags = p.flags.clone();
    let final_state = p.add_state(
        NodeKind::Final,
        Span::new(pattern_len, pattern_len),
        TransitionType::Epsilon,
        flags,
    );
    p.set_continuation(root, final_state);
    p.resolve_backrefs();
    if let Some((msg, span)) = eof_error {
        p.report(msg, ErrorElement::EndOfRegex(span), vec![span]);
    }
    debug!("parsed {} nodes, {} errors", p.nodes.len(), p.errors.len());
    Parsed {
        pattern: pattern.to_string(),
        nodes: p.nodes,
        root,
        final_state,
        opening_quote,
        end_of_regex,
        errors: p.errors,
        groups: p.groups,
        names: p.names,
        initial_flags: initial,
    }
}

struct Parser<'p> {
    pattern: &'p str,
    pattern_len: i32,
    tokens: Vec<Token>,
    idx: usize,
    /// End offset of the most recently consumed token. Used to close
    /// node spans.
    last_end: i32,
    nodes: Vec<Node>,
    errors: Vec<SyntaxError>,
    /// The flags of the current scope. Saved and restored around every
    /// group body.
    flags: FlagSet,
    scopes: Vec<FlagSet>,
    /// One slot per capturing group, indexed by number minus one. The
    /// slot is reserved at the opening parenthesis and filled at the
    /// closing one.
    groups: Vec<Option<NodeId>>,
    names: HashMap<String, u32>,
    /// Back reference nodes, resolved against the group table once the
    /// whole pattern has been read.
    backrefs: Vec<NodeId>,
}

impl<'p> Parser<'p> {
    // Cursor

    fn current(&self) -> Option<&SourceChar> {
        self.tokens.get(self.idx).map(|t| &t.sc)
    }

    fn at_plain(&self, ch: char) -> bool {
        self.current().map_or(false, |sc| !sc.is_escape() && sc.ch() == ch)
    }

    fn at_digit(&self) -> bool {
        self.current().map_or(false, |sc| !sc.is_escape() && sc.ch().is_ascii_digit())
    }

    /// The nth significant token after the current one, as repeated
    /// `bump` calls would reach it.
    fn lookahead(&self, n: usize) -> Option<&SourceChar> {
        let mut j = self.idx;
        for _ in 0..n {
            j = self.skip_from(j + 1);
        }
        self.tokens.get(j).map(|t| &t.sc)
    }

    fn lookahead_plain(&self, n: usize) -> Option<char> {
        self.lookahead(n).and_then(|sc| {
            if sc.is_escape() {
                None
            } else {
                Some(sc.ch())
            }
        })
    }

    /// Consumes the current token, reporting any lexical error that was
    /// attached to it.
    fn bump(&mut self) {
        if self.idx < self.tokens.len() {
            self.last_end = self.tokens[self.idx].sc.span().end;
            if let Some(msg) = self.tokens[self.idx].error.take() {
                let sc = self.tokens[self.idx].sc.clone();
                let span = sc.span();
                self.report(msg, ErrorElement::Character(sc), vec![span]);
            }
            self.idx += 1;
            self.skip_space();
        }
    }

    /// In free-spacing mode, skips whitespace and `#` comments up to the
    /// next significant token. Escaped whitespace stays significant.
    fn skip_space(&mut self) {
        self.idx = self.skip_from(self.idx);
    }

    /// The index of the first significant token at or after `j`.
    fn skip_from(&self, mut j: usize) -> usize {
        if !self.flags.contains(Flags::COMMENTS) {
            return j;
        }
        loop {
            match self.tokens.get(j) {
                Some(t) if !t.sc.is_escape() && t.sc.ch().is_whitespace() => {
                    j += 1;
                }
                Some(t) if !t.sc.is_escape() && t.sc.ch() == '#' => {
                    j += 1;
                    while let Some(t) = self.tokens.get(j) {
                        let end = t.sc.ch() == '\n' && !t.sc.is_escape();
                        j += 1;
                        if end {
                            break;
                        }
                    }
                }
                _ => break,
            }
        }
        j
    }

    /// The begin offset of the current token, or the pattern end.
    fn here(&self) -> i32 {
        match self.current() {
            Some(sc) => sc.span().begin,
            None => self.pattern_len,
        }
    }

    fn end_span(&self) -> Span {
        Span::new(self.pattern_len, self.pattern_len)
    }

    fn current_element(&self) -> (ErrorElement, Span) {
        match self.current() {
            Some(sc) => (ErrorElement::Character(sc.clone()), sc.span()),
            None => (ErrorElement::EndOfRegex(self.end_span()), self.end_span()),
        }
    }

    // Arena

    fn add_node(&mut self, kind: NodeKind, span: Span, incoming: TransitionType) -> NodeId {
        let flags = self.flags.clone();
        self.add_state(kind, span, incoming, flags)
    }

    fn add_state(
        &mut self,
        kind: NodeKind,
        span: Span,
        incoming: TransitionType,
        flags: FlagSet,
    ) -> NodeId {
        let id = self.nodes.len() as NodeId;
        self.nodes.push(Node { kind, span, flags, incoming, successors: Vec::new() });
        id
    }

    fn succ(&mut self, id: NodeId, successors: Vec<NodeId>) {
        self.nodes[id as usize].successors = successors;
    }

    fn report(&mut self, message: String, element: ErrorElement, locations: Vec<Span>) {
        trace!("syntax error: {} at {}", message, locations[0]);
        self.errors.push(SyntaxError::new(message, element, locations));
    }

    // Flag scopes

    fn push_scope(&mut self) {
        self.scopes.push(self.flags.clone());
    }

    fn pop_scope(&mut self) {
        // Pushes and pops are balanced by the grammar.
        if let Some(flags) = self.scopes.pop() {
            self.flags = flags;
        }
    }

    fn apply_flags(&mut self, sources: &[(Flags, SourceChar)], disabled: Flags) {
        for (flag, sc) in sources {
            self.flags.enable(*flag, sc.clone());
        }
        self.flags.disable(disabled);
        // Enabling 'x' takes effect immediately.
        self.skip_space();
    }

    // Grammar

    /// Parses the whole pattern. A stray `)` ends the disjunction below
    /// it, so it is reported here and the pieces on either side are
    /// merged back into one tree.
    fn parse_top(&mut self) -> NodeId {
        let mut pieces = vec![self.parse_disjunction()];
        while let Some(sc) = self.current().cloned() {
            self.report(
                "Unexpected ')'".to_string(),
                ErrorElement::Character(sc.clone()),
                vec![sc.span()],
            );
            self.bump();
            pieces.push(self.parse_disjunction());
        }
        if pieces.len() == 1 {
            return pieces[0];
        }
        let span = self.nodes[pieces[0] as usize]
            .span
            .merge(self.nodes[*pieces.last().unwrap() as usize].span);
        self.add_node(NodeKind::Sequence { items: pieces }, span, TransitionType::Epsilon)
    }

    fn parse_disjunction(&mut self) -> NodeId {
        let first = self.parse_sequence();
        if !self.at_plain('|') {
            return first;
        }
        let mut alternatives = vec![first];
        let mut operators = Vec::new();
        while self.at_plain('|') {
            operators.push(self.current().map(|sc| sc.span()).unwrap_or(self.end_span()));
            self.bump();
            alternatives.push(self.parse_sequence());
        }
        let span = self.nodes[alternatives[0] as usize]
            .span
            .merge(self.nodes[*alternatives.last().unwrap() as usize].span);
        self.add_node(
            NodeKind::Disjunction { alternatives, operators },
            span,
            TransitionType::Epsilon,
        )
    }

    /// Parses a concatenation up to `|`, `)` or the end. A single item
    /// stands for itself without a wrapper node.
    fn parse_sequence(&mut self) -> NodeId {
        let start = self.here();
        let mut items: Vec<NodeId> = Vec::new();
        loop {
            let Some(sc) = self.current().cloned() else { break };
            if !sc.is_escape() {
                match sc.ch() {
                    '|' | ')' => break,
                    '*' | '+' | '?' => {
                        self.parse_simple_quantifier(&mut items);
                        continue;
                    }
                    '{' => {
                        self.parse_curly_quantifier(&mut items);
                        continue;
                    }
                    _ => {}
                }
            }
            let atom = self.parse_atom();
            items.push(atom);
        }
        match items.len() {
            0 => self.add_node(
                NodeKind::Sequence { items },
                Span::new(start, start),
                TransitionType::Epsilon,
            ),
            1 => items[0],
            _ => {
                let span = self.nodes[items[0] as usize]
                    .span
                    .merge(self.nodes[*items.last().unwrap() as usize].span);
                self.add_node(NodeKind::Sequence { items }, span, TransitionType::Epsilon)
            }
        }
    }

    // Quantifiers

    fn parse_simple_quantifier(&mut self, items: &mut Vec<NodeId>) {
        let tok = self.current().cloned().unwrap();
        self.bump();
        let kind = match tok.ch() {
            '*' => SimpleQuantifierKind::Star,
            '+' => SimpleQuantifierKind::Plus,
            _ => SimpleQuantifierKind::QuestionMark,
        };
        let (modifier, end) = self.parse_modifier();
        let span = Span::new(tok.span().begin, end);
        self.apply_quantifier(items, Quantifier::Simple { kind, modifier, span }, tok);
    }

    /// Parses `{n}`, `{n,}` or `{n,m}`. A brace not followed by a digit
    /// is not a quantifier and degrades to a literal `{`.
    fn parse_curly_quantifier(&mut self, items: &mut Vec<NodeId>) {
        let open = self.current().cloned().unwrap();
        self.bump();
        if !self.at_digit() {
            let msg = expected("integer", self.current());
            let (element, loc) = self.current_element();
            self.report(msg, element, vec![loc]);
            let literal = self.add_node(
                NodeKind::Character { ch: '{', escape: false },
                open.span(),
                TransitionType::Character,
            );
            items.push(literal);
            return;
        }
        let min = self.parse_integer();
        let mut max = None;
        let mut open_ended = false;
        let mut single_number = false;
        if self.at_plain(',') {
            self.bump();
            if self.at_digit() {
                max = Some(self.parse_integer());
            } else {
                open_ended = true;
            }
        } else {
            max = Some(min);
            single_number = true;
        }
        if self.at_plain('}') {
            self.bump();
        } else {
            let what = if single_number { "',' or '}'" } else { "'}'" };
            let msg = expected(what, self.current());
            let (element, loc) = self.current_element();
            self.report(msg, element, vec![loc]);
        }
        let (modifier, end) = self.parse_modifier();
        let span = Span::new(open.span().begin, end);
        let quantifier =
            Quantifier::Curly { min, max, open_ended, single_number, modifier, span };
        self.apply_quantifier(items, quantifier, open);
    }

    fn parse_modifier(&mut self) -> (Modifier, i32) {
        if self.at_plain('?') {
            let end = self.current().map(|sc| sc.span().end).unwrap_or(self.last_end);
            self.bump();
            (Modifier::Reluctant, end)
        } else if self.at_plain('+') {
            let end = self.current().map(|sc| sc.span().end).unwrap_or(self.last_end);
            self.bump();
            (Modifier::Possessive, end)
        } else {
            (Modifier::Greedy, self.last_end)
        }
    }

    /// Wraps the preceding item in a repetition. A quantifier with no
    /// operand, or one whose operand is already a repetition, is an
    /// error and is dropped.
    fn apply_quantifier(&mut self, items: &mut Vec<NodeId>, quantifier: Quantifier, tok: SourceChar) {
        let qspan = quantifier.span();
        match items.last().copied() {
            Some(last)
                if !matches!(self.nodes[last as usize].kind, NodeKind::Repetition { .. }) =>
            {
                let span = self.nodes[last as usize].span.merge(qspan);
                let repetition = self.add_node(
                    NodeKind::Repetition { inner: last, quantifier },
                    span,
                    TransitionType::Epsilon,
                );
                *items.last_mut().unwrap() = repetition;
            }
            Some(_) => {
                let text = &self.pattern[qspan.begin as usize..qspan.end as usize];
                let msg = format!("Unexpected quantifier '{}'", text);
                self.report(msg, ErrorElement::Character(tok), vec![qspan]);
            }
            None => {
                let text = &self.pattern[qspan.begin as usize..qspan.end as usize];
                let msg = format!("Unexpected quantifier '{}'", text);
                self.report(msg, ErrorElement::OpeningQuote, vec![qspan]);
            }
        }
    }

    fn parse_integer(&mut self) -> u32 {
        let mut n: u32 = 0;
        while let Some(sc) = self.current() {
            if sc.is_escape() || !sc.ch().is_ascii_digit() {
                break;
            }
            n = n.saturating_mul(10).saturating_add(sc.ch().to_digit(10).unwrap());
            self.bump();
        }
        n
    }

    // Atoms

    fn parse_atom(&mut self) -> NodeId {
        let sc = self.current().cloned().unwrap();
        if sc.is_escape() {
            self.bump();
            return self.add_node(
                NodeKind::Character { ch: sc.ch(), escape: true },
                sc.span(),
                TransitionType::Character,
            );
        }
        match sc.ch() {
            '(' => self.parse_group(),
            '[' => self.parse_class(),
            '\\' => self.parse_escape_atom(),
            '.' => {
                self.bump();
                self.add_node(NodeKind::Dot, sc.span(), TransitionType::Character)
            }
            '^' => {
                self.bump();
                self.add_node(
                    NodeKind::Boundary(BoundaryKind::LineStart),
                    sc.span(),
                    TransitionType::Epsilon,
                )
            }
            '$' => {
                self.bump();
                self.add_node(
                    NodeKind::Boundary(BoundaryKind::LineEnd),
                    sc.span(),
                    TransitionType::Epsilon,
                )
            }
            ch => {
                self.bump();
                self.add_node(
                    NodeKind::Character { ch, escape: false },
                    sc.span(),
                    TransitionType::Character,
                )
            }
        }
    }

    // Groups

    fn parse_group(&mut self) -> NodeId {
        let open_begin = self.here();
        self.bump(); // '('
        if !self.at_plain('?') {
            let number = self.reserve_group();
            let inner = self.parse_group_body();
            let span = self.close_group(open_begin);
            return self.finish_capturing(number, None, inner, span);
        }
        self.bump(); // '?'
        if self.at_plain('<') {
            if matches!(self.lookahead_plain(1), Some('=') | Some('!')) {
                let positive = self.lookahead_plain(1) == Some('=');
                self.bump();
                self.bump();
                let inner = self.parse_group_body();
                let span = self.close_group(open_begin);
                return self.add_node(
                    NodeKind::LookAround { positive, ahead: false, inner },
                    span,
                    TransitionType::Epsilon,
                );
            }
            self.bump();
            let name = self.parse_group_name();
            let number = self.reserve_group();
            if let Some((name, span)) = &name {
                if self.names.contains_key(name) {
                    let msg = format!("Group name '{}' is already defined", name);
                    let (element, _) = self.current_element();
                    self.report(msg, element, vec![*span]);
                } else {
                    self.names.insert(name.clone(), number);
                }
            }
            let inner = self.parse_group_body();
            let span = self.close_group(open_begin);
            return self.finish_capturing(number, name.map(|(n, _)| n), inner, span);
        }
        if self.at_plain('=') || self.at_plain('!') {
            let positive = self.at_plain('=');
            self.bump();
            let inner = self.parse_group_body();
            let span = self.close_group(open_begin);
            return self.add_node(
                NodeKind::LookAround { positive, ahead: true, inner },
                span,
                TransitionType::Epsilon,
            );
        }
        if self.at_plain('>') {
            self.bump();
            let inner = self.parse_group_body();
            let span = self.close_group(open_begin);
            return self.add_node(NodeKind::Atomic { inner }, span, TransitionType::Epsilon);
        }
        if self.at_plain(':') {
            self.bump();
            let inner = self.parse_group_body();
            let span = self.close_group(open_begin);
            return self.add_node(
                NodeKind::NonCapturing {
                    enabled: Flags::empty(),
                    disabled: Flags::empty(),
                    inner: Some(inner),
                },
                span,
                TransitionType::Epsilon,
            );
        }
        // Inline flags: (?im-x) for the rest of the enclosing group, or
        // (?im-x:...) scoped to a body.
        let (enabled, disabled, sources) = self.parse_flag_letters();
        if self.at_plain(':') {
            self.bump();
            self.push_scope();
            self.apply_flags(&sources, disabled);
            self.skip_space();
            let inner = self.parse_disjunction();
            self.pop_scope();
            let span = self.close_group(open_begin);
            return self.add_node(
                NodeKind::NonCapturing { enabled, disabled, inner: Some(inner) },
                span,
                TransitionType::Epsilon,
            );
        }
        let span = self.close_group(open_begin);
        // No body: the flags stay in effect until the enclosing group
        // closes. Tokens skipped under the new flags start after it.
        self.apply_flags(&sources, disabled);
        self.skip_space();
        self.add_node(
            NodeKind::NonCapturing { enabled, disabled, inner: None },
            span,
            TransitionType::Epsilon,
        )
    }

    fn parse_group_body(&mut self) -> NodeId {
        self.push_scope();
        let inner = self.parse_disjunction();
        self.pop_scope();
        inner
    }

    fn close_group(&mut self, open_begin: i32) -> Span {
        if self.at_plain(')') {
            self.bump();
        } else {
            let msg = expected("')'", self.current());
            let (element, loc) = self.current_element();
            self.report(msg, element, vec![loc]);
        }
        Span::new(open_begin, self.last_end)
    }

    fn reserve_group(&mut self) -> u32 {
        self.groups.push(None);
        self.groups.len() as u32
    }

    fn finish_capturing(
        &mut self,
        number: u32,
        name: Option<String>,
        inner: NodeId,
        span: Span,
    ) -> NodeId {
        let id = self.add_node(
            NodeKind::Capturing { number, name, inner },
            span,
            TransitionType::Epsilon,
        );
        self.groups[number as usize - 1] = Some(id);
        id
    }

    /// Parses a group name after `<`, up to and including `>`.
    fn parse_group_name(&mut self) -> Option<(String, Span)> {
        let start = self.here();
        let mut name = String::new();
        while let Some(sc) = self.current() {
            if sc.is_escape() || !sc.ch().is_ascii_alphanumeric() {
                break;
            }
            name.push(sc.ch());
            self.bump();
        }
        let valid = name.chars().next().map_or(false, |c| c.is_ascii_alphabetic());
        if !valid {
            let msg = expected("a group name", self.current());
            let (element, loc) = self.current_element();
            self.report(msg, element, vec![loc]);
        }
        if self.at_plain('>') {
            self.bump();
        } else {
            let msg = expected("'>'", self.current());
            let (element, loc) = self.current_element();
            self.report(msg, element, vec![loc]);
        }
        if name.is_empty() {
            None
        } else {
            Some((name, Span::new(start, self.last_end)))
        }
    }

    /// Parses flag letters up to `:`, `)` or the end. Disabled flags
    /// follow a single `-`.
    fn parse_flag_letters(&mut self) -> (Flags, Flags, Vec<(Flags, SourceChar)>) {
        let mut enabled = Flags::empty();
        let mut disabled = Flags::empty();
        let mut sources = Vec::new();
        let mut negate = false;
        let mut dangling = false;
        loop {
            let Some(sc) = self.current().cloned() else {
                if dangling {
                    let msg = expected("flag", None);
                    let (element, loc) = self.current_element();
                    self.report(msg, element, vec![loc]);
                }
                break;
            };
            if !sc.is_escape() && (sc.ch() == ':' || sc.ch() == ')') {
                if dangling {
                    let msg = expected("flag", Some(&sc));
                    self.report(msg, ErrorElement::Character(sc.clone()), vec![sc.span()]);
                }
                break;
            }
            if !sc.is_escape() && sc.ch() == '-' {
                if negate {
                    self.report(
                        "Expected flag, but found '-'".to_string(),
                        ErrorElement::Character(sc.clone()),
                        vec![sc.span()],
                    );
                }
                negate = true;
                dangling = true;
                self.bump();
                continue;
            }
            match Flags::from_letter(sc.ch()) {
                Some(flag) => {
                    if negate {
                        disabled |= flag;
                    } else {
                        enabled |= flag;
                        sources.push((flag, sc.clone()));
                    }
                    dangling = false;
                }
                None => {
                    let msg = expected("flag", Some(&sc));
                    self.report(msg, ErrorElement::Character(sc.clone()), vec![sc.span()]);
                }
            }
            self.bump();
        }
        (enabled, disabled, sources)
    }

    // Escapes outside character classes

    fn parse_escape_atom(&mut self) -> NodeId {
        let bs = self.current().cloned().unwrap();
        self.bump();
        let Some(sc) = self.current().cloned() else {
            // The lexer attached the dangling-backslash error.
            return self.add_node(
                NodeKind::Character { ch: '\\', escape: true },
                bs.span(),
                TransitionType::Character,
            );
        };
        match sc.ch() {
            'd' | 'D' | 's' | 'S' | 'w' | 'W' | 'h' | 'H' | 'v' | 'V' => {
                self.bump();
                self.add_node(
                    NodeKind::EscapedClass {
                        letter: sc.ch(),
                        property: None,
                        negated: sc.ch().is_ascii_uppercase(),
                    },
                    bs.span().merge(sc.span()),
                    TransitionType::Character,
                )
            }
            'p' | 'P' => self.parse_property(&bs),
            'b' => {
                self.bump();
                if self.at_plain('{')
                    && self.lookahead_plain(1) == Some('g')
                    && self.lookahead_plain(2) == Some('}')
                {
                    self.bump();
                    self.bump();
                    self.bump();
                    self.add_node(
                        NodeKind::Boundary(BoundaryKind::UnicodeExtendedGraphemeCluster),
                        Span::new(bs.span().begin, self.last_end),
                        TransitionType::Epsilon,
                    )
                } else {
                    self.add_node(
                        NodeKind::Boundary(BoundaryKind::Word),
                        bs.span().merge(sc.span()),
                        TransitionType::Epsilon,
                    )
                }
            }
            'B' => self.boundary_escape(&bs, &sc, BoundaryKind::NonWord),
            'A' => self.boundary_escape(&bs, &sc, BoundaryKind::InputStart),
            'z' => self.boundary_escape(&bs, &sc, BoundaryKind::InputEnd),
            'Z' => self.boundary_escape(&bs, &sc, BoundaryKind::InputEndFinalTerminator),
            'G' => self.boundary_escape(&bs, &sc, BoundaryKind::PreviousMatchEnd),
            'R' => {
                self.bump();
                self.add_node(
                    NodeKind::MiscEscape { kind: MiscEscapeKind::LineBreak, name: None },
                    bs.span().merge(sc.span()),
                    TransitionType::Character,
                )
            }
            'X' => {
                self.bump();
                self.add_node(
                    NodeKind::MiscEscape { kind: MiscEscapeKind::AnyGrapheme, name: None },
                    bs.span().merge(sc.span()),
                    TransitionType::Character,
                )
            }
            'N' => self.parse_named_character(&bs),
            'k' => self.parse_named_backref(&bs),
            '1'..='9' => self.parse_numeric_backref(&bs),
            _ => {
                self.bump();
                let span = bs.span().merge(sc.span());
                let msg = format!("Invalid escape sequence '\\{}'", sc.ch());
                self.report(msg, ErrorElement::Character(sc.clone()), vec![span]);
                self.add_node(
                    NodeKind::Character { ch: sc.ch(), escape: true },
                    span,
                    TransitionType::Character,
                )
            }
        }
    }

    fn boundary_escape(&mut self, bs: &SourceChar, sc: &SourceChar, kind: BoundaryKind) -> NodeId {
        self.bump();
        self.add_node(
            NodeKind::Boundary(kind),
            bs.span().merge(sc.span()),
            TransitionType::Epsilon,
        )
    }

    /// `\p{Name}`, `\pL` or their negations with `P`.
    fn parse_property(&mut self, bs: &SourceChar) -> NodeId {
        let p = self.current().cloned().unwrap();
        self.bump();
        let negated = p.ch() == 'P';
        if self.at_plain('{') {
            self.bump();
            let mut name = String::new();
            while let Some(sc) = self.current() {
                if !sc.is_escape() && sc.ch() == '}' {
                    break;
                }
                name.push(sc.ch());
                self.bump();
            }
            if name.is_empty() {
                let msg = expected("a property name", self.current());
                let (element, loc) = self.current_element();
                self.report(msg, element, vec![loc]);
            }
            if self.at_plain('}') {
                self.bump();
            } else {
                let msg = expected("'}'", self.current());
                let (element, loc) = self.current_element();
                self.report(msg, element, vec![loc]);
            }
            self.add_node(
                NodeKind::EscapedClass { letter: p.ch(), property: Some(name), negated },
                Span::new(bs.span().begin, self.last_end),
                TransitionType::Character,
            )
        } else {
            match self.current().cloned() {
                Some(sc) if !sc.is_escape() && sc.ch().is_ascii_alphabetic() => {
                    self.bump();
                    self.add_node(
                        NodeKind::EscapedClass {
                            letter: p.ch(),
                            property: Some(sc.ch().to_string()),
                            negated,
                        },
                        Span::new(bs.span().begin, self.last_end),
                        TransitionType::Character,
                    )
                }
                _ => {
                    let msg = expected("'{' or a property letter", self.current());
                    let (element, loc) = self.current_element();
                    self.report(msg, element, vec![loc]);
                    self.add_node(
                        NodeKind::EscapedClass { letter: p.ch(), property: None, negated },
                        bs.span().merge(p.span()),
                        TransitionType::Character,
                    )
                }
            }
        }
    }

    /// `\N{NAME}`.
    fn parse_named_character(&mut self, bs: &SourceChar) -> NodeId {
        self.bump(); // 'N'
        let mut name = None;
        if self.at_plain('{') {
            self.bump();
            let mut text = String::new();
            while let Some(sc) = self.current() {
                if !sc.is_escape() && sc.ch() == '}' {
                    break;
                }
                text.push(sc.ch());
                self.bump();
            }
            if self.at_plain('}') {
                self.bump();
            } else {
                let msg = expected("'}'", self.current());
                let (element, loc) = self.current_element();
                self.report(msg, element, vec![loc]);
            }
            name = Some(text);
        } else {
            let msg = expected("'{'", self.current());
            let (element, loc) = self.current_element();
            self.report(msg, element, vec![loc]);
        }
        self.add_node(
            NodeKind::MiscEscape { kind: MiscEscapeKind::NamedCharacter, name },
            Span::new(bs.span().begin, self.last_end),
            TransitionType::Character,
        )
    }

    /// `\k<name>`.
    fn parse_named_backref(&mut self, bs: &SourceChar) -> NodeId {
        self.bump(); // 'k'
        let name = if self.at_plain('<') {
            self.bump();
            self.parse_group_name().map(|(n, _)| n)
        } else {
            let msg = expected("'<'", self.current());
            let (element, loc) = self.current_element();
            self.report(msg, element, vec![loc]);
            None
        };
        let span = Span::new(bs.span().begin, self.last_end);
        let kind = BackRefKind::Name(name.unwrap_or_default());
        let id = self.add_node(
            NodeKind::BackReference { kind, group: None },
            span,
            TransitionType::BackReference,
        );
        self.backrefs.push(id);
        id
    }

    /// `\1` through `\99...`. Digits are consumed greedily as long as
    /// the resulting number does not exceed the count of groups opened
    /// so far; the first digit is always consumed.
    fn parse_numeric_backref(&mut self, bs: &SourceChar) -> NodeId {
        let first = self.current().cloned().unwrap();
        self.bump();
        let mut value = first.ch().to_digit(10).unwrap();
        let mut span = bs.span().merge(first.span());
        while let Some(sc) = self.current() {
            if sc.is_escape() || !sc.ch().is_ascii_digit() {
                break;
            }
            let next = value * 10 + sc.ch().to_digit(10).unwrap();
            if next > self.groups.len() as u32 {
                break;
            }
            value = next;
            span = span.merge(sc.span());
            self.bump();
        }
        let id = self.add_node(
            NodeKind::BackReference { kind: BackRefKind::Number(value), group: None },
            span,
            TransitionType::BackReference,
        );
        self.backrefs.push(id);
        id
    }

    // Character classes

    fn parse_class(&mut self) -> NodeId {
        let open = self.current().cloned().unwrap();
        self.bump(); // '['
        let negated = if self.at_plain('^') {
            self.bump();
            true
        } else {
            false
        };
        let content = self.parse_class_contents();
        if self.at_plain(']') {
            self.bump();
        } else {
            let msg = expected("']'", self.current());
            let (element, loc) = self.current_element();
            self.report(msg, element, vec![loc]);
        }
        self.add_node(
            NodeKind::CharacterClass { negated, content },
            Span::new(open.span().begin, self.last_end),
            TransitionType::Character,
        )
    }

    fn parse_class_contents(&mut self) -> NodeId {
        let first = self.parse_class_union(true);
        if !self.at_intersection() {
            return first;
        }
        let mut operands = vec![first];
        let mut operators = Vec::new();
        while self.at_intersection() {
            let begin = self.here();
            self.bump();
            self.bump();
            operators.push(Span::new(begin, self.last_end));
            operands.push(self.parse_class_union(false));
        }
        let span = self.nodes[operands[0] as usize]
            .span
            .merge(self.nodes[*operands.last().unwrap() as usize].span);
        let span = operators.iter().fold(span, |acc, op| acc.merge(*op));
        self.add_node(
            NodeKind::ClassIntersection { operands, operators },
            span,
            TransitionType::Epsilon,
        )
    }

    fn at_intersection(&self) -> bool {
        self.at_plain('&') && self.lookahead_plain(1) == Some('&')
    }

    /// Parses juxtaposed class elements up to `]`, `&&` or the end. When
    /// `leading` is true, a `]` in first position is a literal.
    fn parse_class_union(&mut self, leading: bool) -> NodeId {
        let start = self.here();
        let mut items: Vec<NodeId> = Vec::new();
        let mut first = leading;
        loop {
            let Some(sc) = self.current().cloned() else { break };
            if !sc.is_escape() && sc.ch() == ']' {
                if !first {
                    break;
                }
                self.bump();
                items.push(self.add_node(
                    NodeKind::Character { ch: ']', escape: false },
                    sc.span(),
                    TransitionType::Character,
                ));
            } else if self.at_intersection() {
                break;
            } else {
                self.parse_class_member(&mut items);
            }
            first = false;
        }
        match items.len() {
            1 => items[0],
            _ => {
                let span = if items.is_empty() {
                    Span::new(start, start)
                } else {
                    self.nodes[items[0] as usize]
                        .span
                        .merge(self.nodes[*items.last().unwrap() as usize].span)
                };
                self.add_node(NodeKind::ClassUnion { items }, span, TransitionType::Epsilon)
            }
        }
    }

    /// Parses one class element, joining it with the next into a range
    /// when a `-` sits between two plain characters. A `-` before `]`
    /// or the end is a literal.
    fn parse_class_member(&mut self, items: &mut Vec<NodeId>) {
        let lhs = self.parse_class_element();
        if !self.at_plain('-')
            || self.lookahead_plain(1) == Some(']')
            || self.lookahead(1).is_none()
        {
            items.push(lhs);
            return;
        }
        if !matches!(self.nodes[lhs as usize].kind, NodeKind::Character { .. }) {
            // No range starts here; the dash becomes the next element.
            items.push(lhs);
            return;
        }
        self.bump(); // '-'
        let rhs = self.parse_class_element();
        let span = self.nodes[lhs as usize].span.merge(self.nodes[rhs as usize].span);
        match (self.char_of(lhs), self.char_of(rhs)) {
            (Some(lower), Some(upper)) => {
                let id = self.add_node(
                    NodeKind::CharacterRange { lower, upper },
                    span,
                    TransitionType::Character,
                );
                if lower > upper {
                    self.report(
                        "Illegal character range".to_string(),
                        ErrorElement::Node(id),
                        vec![span],
                    );
                }
                items.push(id);
            }
            _ => {
                // The right-hand bound is a class escape or a nested
                // class. Keep both operands as plain elements.
                self.report(
                    "Illegal character range".to_string(),
                    ErrorElement::Node(rhs),
                    vec![span],
                );
                items.push(lhs);
                items.push(rhs);
            }
        }
    }

    fn char_of(&self, id: NodeId) -> Option<char> {
        match self.nodes[id as usize].kind {
            NodeKind::Character { ch, .. } => Some(ch),
            _ => None,
        }
    }

    fn parse_class_element(&mut self) -> NodeId {
        let sc = self.current().cloned().unwrap();
        if !sc.is_escape() {
            match sc.ch() {
                '[' => return self.parse_class(),
                '\\' => return self.parse_class_escape(),
                _ => {}
            }
        }
        self.bump();
        self.add_node(
            NodeKind::Character { ch: sc.ch(), escape: sc.is_escape() },
            sc.span(),
            TransitionType::Character,
        )
    }

    /// Escapes inside a class: the escape classes, `\b` as backspace,
    /// everything else is an error.
    fn parse_class_escape(&mut self) -> NodeId {
        let bs = self.current().cloned().unwrap();
        self.bump();
        let Some(sc) = self.current().cloned() else {
            return self.add_node(
                NodeKind::Character { ch: '\\', escape: true },
                bs.span(),
                TransitionType::Character,
            );
        };
        match sc.ch() {
            'd' | 'D' | 's' | 'S' | 'w' | 'W' | 'h' | 'H' | 'v' | 'V' => {
                self.bump();
                self.add_node(
                    NodeKind::EscapedClass {
                        letter: sc.ch(),
                        property: None,
                        negated: sc.ch().is_ascii_uppercase(),
                    },
                    bs.span().merge(sc.span()),
                    TransitionType::Character,
                )
            }
            'p' | 'P' => self.parse_property(&bs),
            'b' => {
                self.bump();
                self.add_node(
                    NodeKind::Character { ch: '\u{08}', escape: true },
                    bs.span().merge(sc.span()),
                    TransitionType::Character,
                )
            }
            _ => {
                self.bump();
                let span = bs.span().merge(sc.span());
                let msg = format!("Invalid escape sequence '\\{}'", sc.ch());
                self.report(msg, ErrorElement::Character(sc.clone()), vec![span]);
                self.add_node(
                    NodeKind::Character { ch: sc.ch(), escape: true },
                    span,
                    TransitionType::Character,
                )
            }
        }
    }

    // Graph wiring

    /// Threads `id` to the state a matcher moves to after it, creating
    /// the synthetic states of composite nodes on the way. Called once
    /// per node, starting from the root.
    fn set_continuation(&mut self, id: NodeId, cont: NodeId) {
        let kind = self.nodes[id as usize].kind.clone();
        match kind {
            NodeKind::Sequence { items } => {
                if items.is_empty() {
                    self.succ(id, vec![cont]);
                } else {
                    self.succ(id, vec![items[0]]);
                    for pair in items.windows(2) {
                        self.set_continuation(pair[0], pair[1]);
                    }
                    self.set_continuation(*items.last().unwrap(), cont);
                }
            }
            NodeKind::Disjunction { alternatives, .. } => {
                self.succ(id, alternatives.clone());
                for alt in alternatives {
                    self.set_continuation(alt, cont);
                }
            }
            NodeKind::Capturing { number, inner, .. } => {
                let end = self.synthetic(id, NodeKind::EndOfCapturingGroup { number });
                self.succ(end, vec![cont]);
                self.succ(id, vec![inner]);
                self.set_continuation(inner, end);
            }
            NodeKind::NonCapturing { inner: Some(inner), .. }
            | NodeKind::Atomic { inner } => {
                self.succ(id, vec![inner]);
                self.set_continuation(inner, cont);
            }
            NodeKind::NonCapturing { inner: None, .. } => {
                self.succ(id, vec![cont]);
            }
            NodeKind::Repetition { inner, quantifier } => {
                let end = self.synthetic(id, NodeKind::EndOfRepetition);
                self.succ(end, vec![id]);
                match quantifier.modifier() {
                    Modifier::Reluctant => self.succ(id, vec![cont, inner]),
                    // Possessive repetitions have the greedy shape; the
                    // modifier on the quantifier tells them apart.
                    _ => self.succ(id, vec![inner, cont]),
                }
                self.set_continuation(inner, end);
            }
            NodeKind::LookAround { positive, ahead, inner } => {
                let end_incoming = if ahead {
                    TransitionType::LookaroundBacktracking
                } else {
                    TransitionType::Epsilon
                };
                let end = self.synthetic_with(id, NodeKind::EndOfLookaround, end_incoming);
                self.succ(end, vec![cont]);
                let mut entry = inner;
                if !ahead {
                    let start = self.synthetic_with(
                        id,
                        NodeKind::StartOfLookBehind,
                        TransitionType::LookaroundBacktracking,
                    );
                    self.succ(start, vec![entry]);
                    entry = start;
                }
                if !positive {
                    let negation =
                        self.synthetic_with(id, NodeKind::NegationState, TransitionType::Negation);
                    self.succ(negation, vec![entry]);
                    entry = negation;
                }
                self.succ(id, vec![entry, cont]);
                self.set_continuation(inner, end);
            }
            NodeKind::CharacterClass { content, .. } => {
                self.succ(id, vec![cont]);
                self.set_continuation(content, cont);
            }
            NodeKind::ClassUnion { items } => {
                self.succ(id, vec![cont]);
                for item in items {
                    self.set_continuation(item, cont);
                }
            }
            NodeKind::ClassIntersection { operands, .. } => {
                self.succ(id, vec![cont]);
                for operand in operands {
                    self.set_continuation(operand, cont);
                }
            }
            NodeKind::Character { .. }
            | NodeKind::Dot
            | NodeKind::CharacterRange { .. }
            | NodeKind::EscapedClass { .. }
            | NodeKind::Boundary(_)
            | NodeKind::BackReference { .. }
            | NodeKind::MiscEscape { .. } => {
                self.succ(id, vec![cont]);
            }
            NodeKind::Final
            | NodeKind::EndOfRepetition
            | NodeKind::EndOfCapturingGroup { .. }
            | NodeKind::EndOfLookaround
            | NodeKind::StartOfLookBehind
            | NodeKind::NegationState
            | NodeKind::OpeningQuote
            | NodeKind::EndOfRegex => {
                unreachable!("synthetic states have no continuation of their own")
            }
        }
    }

    /// A synthetic, zero-width state belonging to the node `owner`.
    fn synthetic(&mut self, owner: NodeId, kind: NodeKind) -> NodeId {
        self.synthetic_with(owner, kind, TransitionType::Epsilon)
    }

    fn synthetic_with(
        &mut self,
        owner: NodeId,
        kind: NodeKind,
        incoming: TransitionType,
    ) -> NodeId {
        let at = self.nodes[owner as usize].span.end;
        let flags = self.nodes[owner as usize].flags.clone();
        self.add_state(kind, Span::new(at, at), incoming, flags)
    }

    // Back reference resolution

    /// Points every back reference at its group node. References to
    /// groups that never open, including forward references by name that
    /// stay undefined, are left dangling.
    fn resolve_backrefs(&mut self) {
        let backrefs = std::mem::take(&mut self.backrefs);
        for id in backrefs {
            let target = match &self.nodes[id as usize].kind {
                NodeKind::BackReference { kind: BackRefKind::Number(n), .. } => {
                    self.group_slot(*n)
                }
                NodeKind::BackReference { kind: BackRefKind::Name(name), .. } => {
                    self.names.get(name).copied().and_then(|n| self.group_slot(n))
                }
                _ => None,
            };
            if let NodeKind::BackReference { group, .. } = &mut self.nodes[id as usize].kind {
                *group = target;
            }
        }
    }

    fn group_slot(&self, number: u32) -> Option<NodeId> {
        if number == 0 {
            return None;
        }
        self.groups.get(number as usize - 1).copied().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse;

    fn kind(parsed: &Parsed, id: NodeId) -> &NodeKind {
        parsed.node(id).kind()
    }

    fn messages(parsed: &Parsed) -> Vec<&str> {
        parsed.errors().iter().map(|e| e.message()).collect()
    }

    #[test]
    fn empty_pattern_has_a_root() {
        let parsed = parse("");
        assert!(parsed.errors().is_empty());
        assert!(matches!(kind(&parsed, parsed.root()), NodeKind::Sequence { items } if items.is_empty()));
        assert_eq!(parsed.node(parsed.root()).successors(), &[parsed.final_state()]);
    }

    #[test]
    fn single_atom_is_its_own_root() {
        let parsed = parse("a");
        assert!(matches!(kind(&parsed, parsed.root()), NodeKind::Character { ch: 'a', .. }));
    }

    #[test]
    fn counted_repetition_parses() {
        let parsed = parse("x{23,42}");
        assert!(parsed.errors().is_empty());
        let NodeKind::Repetition { inner, quantifier } = kind(&parsed, parsed.root()) else {
            panic!("expected a repetition, got {:?}", kind(&parsed, parsed.root()));
        };
        assert!(matches!(kind(&parsed, *inner), NodeKind::Character { ch: 'x', .. }));
        assert_eq!(quantifier.minimum(), 23);
        assert_eq!(quantifier.maximum(), Some(42));
        assert_eq!(quantifier.modifier(), Modifier::Greedy);
        let Quantifier::Curly { open_ended, single_number, .. } = quantifier else {
            panic!("expected a curly quantifier");
        };
        assert!(!open_ended);
        assert!(!single_number);
    }

    #[test]
    fn single_number_repetition_is_distinct_from_equal_bounds() {
        let a = parse("x{2}");
        let b = parse("x{2,2}");
        let get = |p: &Parsed| match kind(p, p.root()) {
            NodeKind::Repetition { quantifier: Quantifier::Curly { single_number, .. }, .. } => {
                *single_number
            }
            other => panic!("expected a repetition, got {:?}", other),
        };
        assert!(get(&a));
        assert!(!get(&b));
    }

    #[test]
    fn open_ended_repetition_has_no_maximum() {
        let parsed = parse("x{3,}");
        let NodeKind::Repetition { quantifier, .. } = kind(&parsed, parsed.root()) else {
            panic!("expected a repetition");
        };
        assert_eq!(quantifier.minimum(), 3);
        assert_eq!(quantifier.maximum(), None);
    }

    #[test]
    fn reversed_bounds_are_not_reported() {
        // {2,1} can never match, but it is not a syntax error.
        let parsed = parse("x{2,1}");
        assert!(parsed.errors().is_empty());
    }

    #[test]
    fn quantifier_modifiers_parse() {
        fn modifier(pattern: &str) -> Modifier {
            let parsed = parse(pattern);
            match kind(&parsed, parsed.root()) {
                NodeKind::Repetition { quantifier, .. } => quantifier.modifier(),
                other => panic!("expected a repetition, got {:?}", other),
            }
        }
        assert_eq!(modifier("x*?"), Modifier::Reluctant);
        assert_eq!(modifier("x*+"), Modifier::Possessive);
        assert_eq!(modifier("x{1,2}?"), Modifier::Reluctant);
        assert_eq!(modifier("x+"), Modifier::Greedy);
    }

    #[test]
    fn brace_without_digit_is_a_literal() {
        let parsed = parse("a{b}");
        assert_eq!(messages(&parsed), vec!["Expected integer, but found 'b'"]);
        let NodeKind::Sequence { items } = kind(&parsed, parsed.root()) else {
            panic!("expected a sequence");
        };
        assert_eq!(items.len(), 4);
        assert!(matches!(kind(&parsed, items[1]), NodeKind::Character { ch: '{', .. }));
    }

    #[test]
    fn doubled_quantifier_is_reported_once() {
        let parsed = parse("x**");
        assert_eq!(messages(&parsed), vec!["Unexpected quantifier '*'"]);
        assert_eq!(parsed.errors()[0].span(), Span::new(2, 3));
        // The tree keeps the first repetition.
        assert!(matches!(kind(&parsed, parsed.root()), NodeKind::Repetition { .. }));
    }

    #[test]
    fn leading_quantifier_is_anchored_at_the_opening_quote() {
        let parsed = parse("*a");
        assert_eq!(messages(&parsed), vec!["Unexpected quantifier '*'"]);
        assert!(matches!(
            parsed.errors()[0].offending_element(),
            ErrorElement::OpeningQuote
        ));
    }

    #[test]
    fn escaped_metacharacters_are_literals() {
        let parsed = parse(r"a\*b");
        assert!(parsed.errors().is_empty());
        let NodeKind::Sequence { items } = kind(&parsed, parsed.root()) else {
            panic!("expected a sequence");
        };
        assert!(matches!(kind(&parsed, items[1]), NodeKind::Character { ch: '*', escape: true }));
    }

    #[test]
    fn disjunction_has_shared_continuation() {
        let parsed = parse("a|b");
        let root = parsed.root();
        assert_eq!(parsed.node(root).incoming_transition(), TransitionType::Epsilon);
        let NodeKind::Disjunction { alternatives, operators } = kind(&parsed, root) else {
            panic!("expected a disjunction");
        };
        assert_eq!(operators, &[Span::new(1, 2)]);
        assert_eq!(alternatives.len(), 2);
        for &alt in alternatives {
            assert!(matches!(kind(&parsed, alt), NodeKind::Character { .. }));
            assert_eq!(parsed.node(alt).successors(), &[parsed.final_state()]);
        }
        assert_eq!(parsed.node(root).successors(), &alternatives[..]);
    }

    #[test]
    fn groups_are_numbered_by_opening_parenthesis() {
        let parsed = parse("(a(b))(c)");
        assert_eq!(parsed.group_count(), 3);
        for number in 1..=3 {
            let id = parsed.group(number).unwrap();
            assert!(matches!(
                kind(&parsed, id),
                NodeKind::Capturing { number: n, .. } if *n == number
            ));
        }
        assert_eq!(parsed.text(parsed.group(2).unwrap()), "(b)");
        assert_eq!(parsed.text(parsed.group(3).unwrap()), "(c)");
    }

    #[test]
    fn named_groups_are_also_numbered() {
        let parsed = parse("(?<foo>a)(b)");
        assert!(parsed.errors().is_empty());
        assert_eq!(parsed.group_number("foo"), Some(1));
        assert_eq!(parsed.group_count(), 2);
    }

    #[test]
    fn duplicate_group_names_are_reported() {
        let parsed = parse("(?<a>x)(?<a>y)");
        assert_eq!(messages(&parsed), vec!["Group name 'a' is already defined"]);
        // The first definition wins.
        assert_eq!(parsed.group_number("a"), Some(1));
    }

    #[test]
    fn named_backref_to_unknown_group_stays_dangling() {
        let parsed = parse(r"(a)(b)\k<foo>\1\2\3");
        assert_eq!(parsed.group_count(), 2);
        let NodeKind::Sequence { items } = kind(&parsed, parsed.root()) else {
            panic!("expected a sequence");
        };
        let group_of = |id: NodeId| match kind(&parsed, id) {
            NodeKind::BackReference { group, .. } => *group,
            other => panic!("expected a back reference, got {:?}", other),
        };
        assert_eq!(group_of(items[2]), None);
        assert_eq!(group_of(items[3]), parsed.group(1));
        assert_eq!(group_of(items[4]), parsed.group(2));
        assert_eq!(group_of(items[5]), None);
    }

    #[test]
    fn backref_digits_are_consumed_greedily_up_to_the_group_count() {
        let parsed = parse(r"(a)(b)(c)(d)(e)(f)(g)(h)(i)(j)\11");
        // Ten groups: \11 exceeds them, so only \1 is a reference and
        // the second 1 is a literal.
        let NodeKind::Sequence { items } = kind(&parsed, parsed.root()) else {
            panic!("expected a sequence");
        };
        assert!(matches!(
            kind(&parsed, items[10]),
            NodeKind::BackReference { kind: BackRefKind::Number(1), .. }
        ));
        assert!(matches!(kind(&parsed, items[11]), NodeKind::Character { ch: '1', .. }));

        let parsed = parse(r"(a)(b)(c)(d)(e)(f)(g)(h)(i)(j)(k)\11");
        let NodeKind::Sequence { items } = kind(&parsed, parsed.root()) else {
            panic!("expected a sequence");
        };
        assert!(matches!(
            kind(&parsed, items[11]),
            NodeKind::BackReference { kind: BackRefKind::Number(11), .. }
        ));
    }

    #[test]
    fn forward_numeric_backref_is_dangling() {
        let parsed = parse(r"\3(a)");
        let NodeKind::Sequence { items } = kind(&parsed, parsed.root()) else {
            panic!("expected a sequence");
        };
        assert!(matches!(
            kind(&parsed, items[0]),
            NodeKind::BackReference { kind: BackRefKind::Number(3), group: None }
        ));
    }

    #[test]
    fn stray_closing_parenthesis_recovers() {
        let parsed = parse("a)b");
        assert_eq!(messages(&parsed), vec!["Unexpected ')'"]);
        assert_eq!(parsed.errors()[0].span(), Span::new(1, 2));
        // Both sides of the ')' are kept.
        let NodeKind::Sequence { items } = kind(&parsed, parsed.root()) else {
            panic!("expected a sequence");
        };
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn unclosed_group_is_reported_at_the_end() {
        let parsed = parse("(ab");
        assert_eq!(messages(&parsed), vec!["Expected ')', but found the end of the regex"]);
        assert!(matches!(kind(&parsed, parsed.root()), NodeKind::Capturing { .. }));
    }

    #[test]
    fn lookarounds_parse_in_all_four_polarities() {
        let shape = |pattern: &str| {
            let parsed = parse(pattern);
            assert!(parsed.errors().is_empty(), "{:?}", parsed.errors());
            match kind(&parsed, parsed.root()) {
                NodeKind::LookAround { positive, ahead, .. } => (*positive, *ahead),
                other => panic!("expected a lookaround, got {:?}", other),
            }
        };
        assert_eq!(shape("(?=a)"), (true, true));
        assert_eq!(shape("(?!a)"), (false, true));
        assert_eq!(shape("(?<=a)"), (true, false));
        assert_eq!(shape("(?<!a)"), (false, false));
    }

    #[test]
    fn lookahead_body_exits_through_a_backtracking_state() {
        let parsed = parse("(?=a)b");
        let NodeKind::Sequence { items } = kind(&parsed, parsed.root()) else {
            panic!("expected a sequence");
        };
        let look = items[0];
        // First branch enters the body, second skips the assertion.
        let successors = parsed.node(look).successors();
        assert_eq!(successors.len(), 2);
        let body = successors[0];
        assert!(matches!(kind(&parsed, body), NodeKind::Character { ch: 'a', .. }));
        let end = parsed.node(body).successors()[0];
        assert!(matches!(kind(&parsed, end), NodeKind::EndOfLookaround));
        assert_eq!(
            parsed.node(end).incoming_transition(),
            TransitionType::LookaroundBacktracking
        );
    }

    #[test]
    fn negative_lookaround_goes_through_a_negation_state() {
        let parsed = parse("(?!a)");
        let look = parsed.root();
        let entry = parsed.node(look).successors()[0];
        assert!(matches!(kind(&parsed, entry), NodeKind::NegationState));
        assert_eq!(parsed.node(entry).incoming_transition(), TransitionType::Negation);
    }

    #[test]
    fn lookbehind_body_is_entered_through_a_start_state() {
        let parsed = parse("(?<=a)");
        let look = parsed.root();
        let entry = parsed.node(look).successors()[0];
        assert!(matches!(kind(&parsed, entry), NodeKind::StartOfLookBehind));
        assert_eq!(
            parsed.node(entry).incoming_transition(),
            TransitionType::LookaroundBacktracking
        );
    }

    #[test]
    fn atomic_groups_parse() {
        let parsed = parse("(?>ab)");
        assert!(parsed.errors().is_empty());
        assert!(matches!(kind(&parsed, parsed.root()), NodeKind::Atomic { .. }));
    }

    #[test]
    fn repetition_loops_through_an_end_state() {
        let parsed = parse("a*");
        let repetition = parsed.root();
        let successors = parsed.node(repetition).successors();
        // Greedy: body first, continuation second.
        assert_eq!(successors.len(), 2);
        let body = successors[0];
        assert!(matches!(kind(&parsed, body), NodeKind::Character { ch: 'a', .. }));
        assert_eq!(successors[1], parsed.final_state());
        let end = parsed.node(body).successors()[0];
        assert!(matches!(kind(&parsed, end), NodeKind::EndOfRepetition));
        assert_eq!(parsed.node(end).successors(), &[repetition]);
    }

    #[test]
    fn reluctant_repetition_tries_the_exit_first() {
        let parsed = parse("a*?");
        let successors = parsed.node(parsed.root()).successors();
        assert_eq!(successors[0], parsed.final_state());
        assert!(matches!(kind(&parsed, successors[1]), NodeKind::Character { .. }));
    }

    #[test]
    fn capturing_group_exits_through_an_end_state() {
        let parsed = parse("(a)b");
        let NodeKind::Sequence { items } = kind(&parsed, parsed.root()) else {
            panic!("expected a sequence");
        };
        let group = items[0];
        let body = parsed.node(group).successors()[0];
        let end = parsed.node(body).successors()[0];
        assert!(matches!(kind(&parsed, end), NodeKind::EndOfCapturingGroup { number: 1 }));
        assert_eq!(parsed.node(end).successors(), &[items[1]]);
    }

    #[test]
    fn inline_flags_scope_to_the_enclosing_group() {
        let parsed = parse("(?i)a(?u:b)|[c](?-i:d)(?u)e((?-U)f)g(?U)h(?-u)i");
        assert!(parsed.errors().is_empty(), "{:?}", parsed.errors());
        let mut found = std::collections::HashMap::new();
        struct Collector<'a>(&'a mut std::collections::HashMap<char, Flags>);
        impl crate::Visitor for Collector<'_> {
            fn visit_character(&mut self, parsed: &Parsed, id: NodeId) {
                if let NodeKind::Character { ch, .. } = parsed.node(id).kind() {
                    self.0.insert(*ch, parsed.node(id).active_flags().mask());
                }
            }
        }
        crate::walk(&mut Collector(&mut found), &parsed, parsed.root());
        let i = Flags::CASE_INSENSITIVE;
        let u = Flags::UNICODE_CASE;
        let uu = Flags::UNICODE_CHARACTER_CLASS;
        assert_eq!(found[&'a'], i);
        assert_eq!(found[&'b'], i | u);
        assert_eq!(found[&'c'], i);
        assert_eq!(found[&'d'], Flags::empty());
        assert_eq!(found[&'e'], i | u);
        assert_eq!(found[&'f'], i | u);
        assert_eq!(found[&'g'], i | u);
        assert_eq!(found[&'h'], i | u | uu);
        assert_eq!(found[&'i'], i | uu);
    }

    #[test]
    fn flag_sources_point_at_the_enabling_character() {
        let parsed = parse("(?i)a");
        let NodeKind::Sequence { items } = kind(&parsed, parsed.root()) else {
            panic!("expected a sequence");
        };
        let a = items[1];
        let source = parsed
            .node(a)
            .active_flags()
            .source_of(Flags::CASE_INSENSITIVE)
            .expect("the flag should have a source");
        assert_eq!(source.ch(), 'i');
        assert_eq!(source.span(), Span::new(2, 3));
    }

    #[test]
    fn initial_flags_are_honored() {
        let parsed = crate::parse_with_flags("a b", Flags::COMMENTS);
        let NodeKind::Sequence { items } = kind(&parsed, parsed.root()) else {
            panic!("expected a sequence");
        };
        // The space was skipped.
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn inline_flags_take_effect_before_the_next_token() {
        let parsed = parse("(?x) a");
        assert!(parsed.errors().is_empty(), "{:?}", parsed.errors());
        let NodeKind::Sequence { items } = kind(&parsed, parsed.root()) else {
            panic!("expected a sequence");
        };
        assert_eq!(items.len(), 2);
        assert!(matches!(kind(&parsed, items[1]), NodeKind::Character { ch: 'a', .. }));

        let parsed = parse("(?x: a)");
        assert!(parsed.errors().is_empty(), "{:?}", parsed.errors());
        let NodeKind::NonCapturing { inner: Some(inner), .. } = kind(&parsed, parsed.root())
        else {
            panic!("expected a flags group with a body");
        };
        assert!(matches!(kind(&parsed, *inner), NodeKind::Character { ch: 'a', .. }));
    }

    #[test]
    fn free_spacing_skips_comments_but_not_escaped_whitespace() {
        let parsed = parse("(?x)a # comment\nb\\ c");
        assert!(parsed.errors().is_empty(), "{:?}", parsed.errors());
        let NodeKind::Sequence { items } = kind(&parsed, parsed.root()) else {
            panic!("expected a sequence");
        };
        // flags group, a, b, escaped space, c
        assert_eq!(items.len(), 5);
        assert!(matches!(kind(&parsed, items[3]), NodeKind::Character { ch: ' ', escape: true }));
    }

    #[test]
    fn quoted_sections_are_literal_even_in_free_spacing_mode() {
        let parsed = crate::parse_with_flags(r"\Qa b\E", Flags::COMMENTS);
        let NodeKind::Sequence { items } = kind(&parsed, parsed.root()) else {
            panic!("expected a sequence");
        };
        assert_eq!(items.len(), 3);
        assert!(matches!(kind(&parsed, items[1]), NodeKind::Character { ch: ' ', escape: true }));
    }

    #[test]
    fn dangling_flag_negation_is_reported() {
        let parsed = parse("(?i-)a");
        assert_eq!(messages(&parsed), vec!["Expected flag, but found ')'"]);
    }

    #[test]
    fn dangling_flag_negation_at_the_end_is_reported() {
        let parsed = parse("(?i-");
        assert_eq!(messages(&parsed), vec![
            "Expected flag, but found the end of the regex",
            "Expected ')', but found the end of the regex",
        ]);
    }

    #[test]
    fn unknown_flag_letters_are_reported() {
        let parsed = parse("(?q)a");
        assert_eq!(messages(&parsed), vec!["Expected flag, but found 'q'"]);
    }

    #[test]
    fn class_with_leading_dash_and_bracket_literals() {
        let parsed = parse("[]a-]");
        assert!(parsed.errors().is_empty(), "{:?}", parsed.errors());
        let NodeKind::CharacterClass { negated: false, content } = kind(&parsed, parsed.root())
        else {
            panic!("expected a class");
        };
        let NodeKind::ClassUnion { items } = kind(&parsed, *content) else {
            panic!("expected a union");
        };
        let chars: Vec<char> = items
            .iter()
            .map(|&i| match kind(&parsed, i) {
                NodeKind::Character { ch, .. } => *ch,
                other => panic!("expected characters, got {:?}", other),
            })
            .collect();
        assert_eq!(chars, vec![']', 'a', '-']);
    }

    #[test]
    fn dash_between_dashes_is_a_range() {
        let parsed = parse("[---]");
        assert!(parsed.errors().is_empty(), "{:?}", parsed.errors());
        let NodeKind::CharacterClass { content, .. } = kind(&parsed, parsed.root()) else {
            panic!("expected a class");
        };
        assert!(matches!(
            kind(&parsed, *content),
            NodeKind::CharacterRange { lower: '-', upper: '-' }
        ));
    }

    #[test]
    fn reversed_range_is_reported() {
        let parsed = parse("[z-a]");
        assert_eq!(messages(&parsed), vec!["Illegal character range"]);
        assert_eq!(parsed.errors()[0].span(), Span::new(1, 4));
    }

    #[test]
    fn escape_class_as_range_bound_is_reported() {
        let parsed = parse(r"[a-\d]");
        assert_eq!(messages(&parsed), vec!["Illegal character range"]);
    }

    #[test]
    fn escaped_dash_does_not_form_a_range() {
        let parsed = parse(r"[a\-z]");
        assert!(parsed.errors().is_empty());
        let NodeKind::CharacterClass { content, .. } = kind(&parsed, parsed.root()) else {
            panic!("expected a class");
        };
        let NodeKind::ClassUnion { items } = kind(&parsed, *content) else {
            panic!("expected a union");
        };
        assert_eq!(items.len(), 3);
    }

    #[test]
    fn free_spacing_dash_before_the_closing_bracket_is_a_literal() {
        let parsed = parse("(?x)[a- ]");
        assert!(parsed.errors().is_empty(), "{:?}", parsed.errors());
        let NodeKind::Sequence { items } = kind(&parsed, parsed.root()) else {
            panic!("expected a sequence");
        };
        let NodeKind::CharacterClass { content, .. } = kind(&parsed, items[1]) else {
            panic!("expected a class");
        };
        let NodeKind::ClassUnion { items } = kind(&parsed, *content) else {
            panic!("expected a union, got {:?}", kind(&parsed, *content));
        };
        assert_eq!(items.len(), 2);
        assert!(matches!(kind(&parsed, items[1]), NodeKind::Character { ch: '-', .. }));
    }

    #[test]
    fn free_spacing_class_ending_in_a_dash_recovers() {
        for pattern in ["(?x)[a- ", "(?x)[a-#c"] {
            let parsed = parse(pattern);
            assert_eq!(
                messages(&parsed),
                vec!["Expected ']', but found the end of the regex"],
                "{:?}",
                pattern,
            );
            let NodeKind::Sequence { items } = kind(&parsed, parsed.root()) else {
                panic!("expected a sequence");
            };
            let NodeKind::CharacterClass { content, .. } = kind(&parsed, items[1]) else {
                panic!("expected a class");
            };
            let NodeKind::ClassUnion { items } = kind(&parsed, *content) else {
                panic!("expected a union, got {:?}", kind(&parsed, *content));
            };
            assert!(matches!(kind(&parsed, items[1]), NodeKind::Character { ch: '-', .. }));
        }
    }

    #[test]
    fn class_intersection_operator_may_be_split_by_free_spacing() {
        let parsed = parse("(?x)[a& &b]");
        assert!(parsed.errors().is_empty(), "{:?}", parsed.errors());
        let NodeKind::Sequence { items } = kind(&parsed, parsed.root()) else {
            panic!("expected a sequence");
        };
        let NodeKind::CharacterClass { content, .. } = kind(&parsed, items[1]) else {
            panic!("expected a class");
        };
        let NodeKind::ClassIntersection { operands, .. } = kind(&parsed, *content) else {
            panic!("expected an intersection, got {:?}", kind(&parsed, *content));
        };
        assert_eq!(operands.len(), 2);
        assert!(matches!(kind(&parsed, operands[0]), NodeKind::Character { ch: 'a', .. }));
        assert!(matches!(kind(&parsed, operands[1]), NodeKind::Character { ch: 'b', .. }));
    }

    #[test]
    fn class_intersection_parses() {
        let parsed = parse(r"[a-z&&[^aeiou]]");
        assert!(parsed.errors().is_empty(), "{:?}", parsed.errors());
        let NodeKind::CharacterClass { content, .. } = kind(&parsed, parsed.root()) else {
            panic!("expected a class");
        };
        let NodeKind::ClassIntersection { operands, operators } = kind(&parsed, *content) else {
            panic!("expected an intersection, got {:?}", kind(&parsed, *content));
        };
        assert_eq!(operands.len(), 2);
        assert_eq!(operators, &[Span::new(4, 6)]);
        assert!(matches!(kind(&parsed, operands[0]), NodeKind::CharacterRange { .. }));
        assert!(matches!(
            kind(&parsed, operands[1]),
            NodeKind::CharacterClass { negated: true, .. }
        ));
    }

    #[test]
    fn unterminated_class_is_reported() {
        let parsed = parse("[ab");
        assert_eq!(messages(&parsed), vec!["Expected ']', but found the end of the regex"]);
        assert!(matches!(kind(&parsed, parsed.root()), NodeKind::CharacterClass { .. }));
    }

    #[test]
    fn escape_classes_parse_inside_and_outside_classes() {
        let parsed = parse(r"\d[\w\p{Lu}]");
        assert!(parsed.errors().is_empty(), "{:?}", parsed.errors());
        let NodeKind::Sequence { items } = kind(&parsed, parsed.root()) else {
            panic!("expected a sequence");
        };
        assert!(matches!(
            kind(&parsed, items[0]),
            NodeKind::EscapedClass { letter: 'd', property: None, negated: false }
        ));
    }

    #[test]
    fn unicode_properties_parse() {
        let parsed = parse(r"\p{IsAlphabetic}\PL\pN");
        assert!(parsed.errors().is_empty(), "{:?}", parsed.errors());
        let NodeKind::Sequence { items } = kind(&parsed, parsed.root()) else {
            panic!("expected a sequence");
        };
        assert!(matches!(
            kind(&parsed, items[0]),
            NodeKind::EscapedClass { letter: 'p', property: Some(p), negated: false }
                if p == "IsAlphabetic"
        ));
        assert!(matches!(
            kind(&parsed, items[1]),
            NodeKind::EscapedClass { letter: 'P', property: Some(p), negated: true } if p == "L"
        ));
        assert!(matches!(
            kind(&parsed, items[2]),
            NodeKind::EscapedClass { letter: 'p', property: Some(p), negated: false } if p == "N"
        ));
    }

    #[test]
    fn boundaries_parse() {
        let boundary = |pattern: &str| {
            let parsed = parse(pattern);
            assert!(parsed.errors().is_empty(), "{}: {:?}", pattern, parsed.errors());
            match kind(&parsed, parsed.root()) {
                NodeKind::Boundary(kind) => *kind,
                other => panic!("expected a boundary, got {:?}", other),
            }
        };
        assert_eq!(boundary("^"), BoundaryKind::LineStart);
        assert_eq!(boundary("$"), BoundaryKind::LineEnd);
        assert_eq!(boundary(r"\b"), BoundaryKind::Word);
        assert_eq!(boundary(r"\B"), BoundaryKind::NonWord);
        assert_eq!(boundary(r"\A"), BoundaryKind::InputStart);
        assert_eq!(boundary(r"\z"), BoundaryKind::InputEnd);
        assert_eq!(boundary(r"\Z"), BoundaryKind::InputEndFinalTerminator);
        assert_eq!(boundary(r"\G"), BoundaryKind::PreviousMatchEnd);
        assert_eq!(boundary(r"\b{g}"), BoundaryKind::UnicodeExtendedGraphemeCluster);
    }

    #[test]
    fn backspace_escape_inside_a_class_is_a_character() {
        let parsed = parse(r"[\b]");
        assert!(parsed.errors().is_empty());
        let NodeKind::CharacterClass { content, .. } = kind(&parsed, parsed.root()) else {
            panic!("expected a class");
        };
        assert!(matches!(
            kind(&parsed, *content),
            NodeKind::Character { ch: '\u{08}', escape: true }
        ));
    }

    #[test]
    fn misc_escapes_parse() {
        let parsed = parse(r"\R\X\N{LATIN SMALL LETTER A}");
        assert!(parsed.errors().is_empty(), "{:?}", parsed.errors());
        let NodeKind::Sequence { items } = kind(&parsed, parsed.root()) else {
            panic!("expected a sequence");
        };
        assert!(matches!(
            kind(&parsed, items[0]),
            NodeKind::MiscEscape { kind: MiscEscapeKind::LineBreak, .. }
        ));
        assert!(matches!(
            kind(&parsed, items[1]),
            NodeKind::MiscEscape { kind: MiscEscapeKind::AnyGrapheme, .. }
        ));
        assert!(matches!(
            kind(&parsed, items[2]),
            NodeKind::MiscEscape { kind: MiscEscapeKind::NamedCharacter, name: Some(n) }
                if n == "LATIN SMALL LETTER A"
        ));
    }

    #[test]
    fn invalid_escape_degrades_to_a_literal() {
        let parsed = parse(r"\q");
        assert_eq!(messages(&parsed), vec!["Invalid escape sequence '\\q'"]);
        assert!(matches!(
            kind(&parsed, parsed.root()),
            NodeKind::Character { ch: 'q', escape: true }
        ));
    }

    #[test]
    fn lexical_errors_surface_in_discovery_order() {
        let parsed = parse(r"\x{}a(b");
        let msgs = messages(&parsed);
        assert_eq!(msgs, vec![
            "Expected hexadecimal digit, but found '}'",
            "Expected ')', but found the end of the regex",
        ]);
    }

    #[test]
    fn flags_only_group_has_no_body() {
        let parsed = parse("(?im)a");
        let NodeKind::Sequence { items } = kind(&parsed, parsed.root()) else {
            panic!("expected a sequence");
        };
        let NodeKind::NonCapturing { enabled, disabled, inner } = kind(&parsed, items[0]) else {
            panic!("expected a flags group");
        };
        assert_eq!(*enabled, Flags::CASE_INSENSITIVE | Flags::MULTILINE);
        assert_eq!(*disabled, Flags::empty());
        assert!(inner.is_none());
    }

    #[test]
    fn node_text_reproduces_the_source() {
        let parsed = parse(r"a(bc|d)*");
        assert_eq!(parsed.text(parsed.root()), r"a(bc|d)*");
        let NodeKind::Sequence { items } = kind(&parsed, parsed.root()) else {
            panic!("expected a sequence");
        };
        assert_eq!(parsed.text(items[0]), "a");
        assert_eq!(parsed.text(items[1]), "(bc|d)*");
    }

    #[test]
    fn every_non_terminal_state_has_successors() {
        let patterns = [
            "",
            "a",
            "a|b|c",
            "(a(b(c)))",
            "a*b+?c{2,3}+",
            "(?=a)(?<!b)",
            "[a-z&&[^m]]",
            r"(a)\1",
            "(?i:a(?-i)b)",
            "x**)(",
        ];
        for pattern in patterns {
            let parsed = parse(pattern);
            for id in 0..parsed.node_count() as NodeId {
                let node = parsed.node(id);
                match node.kind() {
                    NodeKind::Final | NodeKind::OpeningQuote | NodeKind::EndOfRegex => {
                        assert!(node.successors().is_empty(), "{:?} in {:?}", node.kind(), pattern);
                    }
                    _ => assert!(
                        !node.successors().is_empty(),
                        "{:?} in {:?} has no successors",
                        node.kind(),
                        pattern,
                    ),
                }
            }
        }
    }

    #[test]
    fn debug_dump_mentions_every_state() {
        let parsed = parse("a|b");
        let dump = format!("{:?}", parsed);
        assert!(dump.contains("alt"));
        assert!(dump.contains("char 'a'"));
        assert!(dump.contains("FINAL"));
    }
}
