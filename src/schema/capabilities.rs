//! Capability extraction
//!
//! Parses tokenized schema text into a [`CapabilitySnapshot`]: the direct
//! supertype, owned attributes and played roles of every declared type.
//! Inherited capabilities are never copied down; see [`super::hierarchy`].

use super::lexer::{tokenize, Keyword, Token, TokenKind};
use crate::error::{GovResult, GovernanceError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

/// Direct capabilities of every type declared in one schema text
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilitySnapshot {
    /// Type -> direct supertype (root kinds are not recorded)
    pub parent_of: BTreeMap<String, String>,
    /// Type -> directly owned attributes. Every declared type has an entry.
    pub owns_of: BTreeMap<String, BTreeSet<String>>,
    /// Type -> directly played `relation:role` pairs
    pub plays_of: BTreeMap<String, BTreeSet<String>>,
    /// Relation -> declared roles
    pub relates_of: BTreeMap<String, BTreeSet<String>>,
}

impl CapabilitySnapshot {
    /// Extract a snapshot from raw schema text
    pub fn extract(schema: &str) -> GovResult<Self> {
        let tokens = tokenize(schema)?;
        let mut parser = Parser {
            tokens: &tokens,
            pos: 0,
            snapshot: CapabilitySnapshot::default(),
        };
        parser.parse()?;
        Ok(parser.snapshot)
    }

    /// All declared type names
    pub fn types(&self) -> BTreeSet<&str> {
        self.owns_of.keys().map(String::as_str).collect()
    }

    pub fn contains_type(&self, name: &str) -> bool {
        self.owns_of.contains_key(name)
    }

    pub fn owns(&self, type_name: &str) -> Option<&BTreeSet<String>> {
        self.owns_of.get(type_name)
    }

    pub fn plays(&self, type_name: &str) -> Option<&BTreeSet<String>> {
        self.plays_of.get(type_name)
    }

    /// SHA-256 over the canonical (sorted) capability maps
    pub fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        for (name, attrs) in &self.owns_of {
            hasher.update(b"T:");
            hasher.update(name.as_bytes());
            if let Some(parent) = self.parent_of.get(name) {
                hasher.update(b"<");
                hasher.update(parent.as_bytes());
            }
            for attr in attrs {
                hasher.update(b"|o:");
                hasher.update(attr.as_bytes());
            }
            for role in self.plays_of.get(name).into_iter().flatten() {
                hasher.update(b"|p:");
                hasher.update(role.as_bytes());
            }
            for role in self.relates_of.get(name).into_iter().flatten() {
                hasher.update(b"|r:");
                hasher.update(role.as_bytes());
            }
            hasher.update(b"\n");
        }
        format!("{:x}", hasher.finalize())
    }

    fn declare(&mut self, name: &str) {
        self.owns_of.entry(name.to_string()).or_default();
        self.plays_of.entry(name.to_string()).or_default();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Define,
    Undefine,
}

struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
    snapshot: CapabilitySnapshot,
}

impl<'t> Parser<'t> {
    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&'t Token> {
        let token = self.tokens.get(self.pos)?;
        self.pos += 1;
        Some(token)
    }

    fn last_line(&self) -> usize {
        self.tokens.last().map(|t| t.line).unwrap_or(1)
    }

    fn unterminated(&self, start: usize) -> GovernanceError {
        GovernanceError::parse(start, "unterminated statement (missing ';')")
    }

    /// Next token, or an unterminated-statement error at end of input
    fn expect_any(&mut self, start: usize) -> GovResult<&'t Token> {
        match self.advance() {
            Some(token) => Ok(token),
            None => Err(self.unterminated(start)),
        }
    }

    fn expect_ident(&mut self, start: usize, what: &str) -> GovResult<String> {
        let token = self.expect_any(start)?;
        match &token.kind {
            TokenKind::Ident(name) => Ok(name.clone()),
            _ if token.is_symbol(';') => Err(GovernanceError::parse(
                token.line,
                format!("expected {} before ';'", what),
            )),
            _ => Err(GovernanceError::parse(
                token.line,
                format!("expected {}, found '{}'", what, token.describe()),
            )),
        }
    }

    fn eat_symbol(&mut self, ch: char) -> bool {
        if self.peek().is_some_and(|t| t.is_symbol(ch)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse(&mut self) -> GovResult<()> {
        let mut mode = Mode::Define;
        while let Some(token) = self.peek() {
            match &token.kind {
                TokenKind::Keyword(Keyword::Define) | TokenKind::Keyword(Keyword::Redefine) => {
                    mode = Mode::Define;
                    self.pos += 1;
                }
                TokenKind::Keyword(Keyword::Undefine) => {
                    mode = Mode::Undefine;
                    self.pos += 1;
                }
                TokenKind::Symbol(';') => {
                    self.pos += 1;
                }
                _ if mode == Mode::Undefine => self.skip_statement()?,
                _ => self.statement()?,
            }
        }
        Ok(())
    }

    /// Undefine blocks contribute nothing to the snapshot
    fn skip_statement(&mut self) -> GovResult<()> {
        let start = self.peek().map(|t| t.line).unwrap_or_else(|| self.last_line());
        loop {
            if self.expect_any(start)?.is_symbol(';') {
                return Ok(());
            }
        }
    }

    fn statement(&mut self) -> GovResult<()> {
        let head = self.expect_any(self.last_line())?;
        let start = head.line;

        let name = match &head.kind {
            TokenKind::Keyword(Keyword::Entity)
            | TokenKind::Keyword(Keyword::Relation)
            | TokenKind::Keyword(Keyword::Attribute) => {
                let kind = head.describe();
                self.expect_ident(start, &format!("a name after '{}'", kind))?
            }
            TokenKind::Ident(name) => name.clone(),
            _ => {
                return Err(GovernanceError::parse(
                    start,
                    format!("unknown declaration keyword '{}'", head.describe()),
                ))
            }
        };
        self.snapshot.declare(&name);

        loop {
            let token = self.expect_any(start)?;
            match &token.kind {
                TokenKind::Symbol(';') => return Ok(()),
                TokenKind::Symbol(',') => {}
                TokenKind::Keyword(Keyword::Sub) => self.sub_clause(&name, start)?,
                TokenKind::Keyword(Keyword::Owns) => self.owns_clause(&name, start)?,
                TokenKind::Keyword(Keyword::Plays) => self.plays_clause(&name, start)?,
                TokenKind::Keyword(Keyword::Relates) => self.relates_clause(&name, start)?,
                TokenKind::Keyword(Keyword::Value) => {
                    self.expect_ident(start, "a value type after 'value'")?;
                }
                TokenKind::Annotation(_) => self.annotation_args(start)?,
                TokenKind::Ident(word) if word == "abstract" => {}
                TokenKind::Ident(word) if word == "regex" => {
                    let pattern = self.expect_any(start)?;
                    if !matches!(pattern.kind, TokenKind::Str(_)) {
                        return Err(GovernanceError::parse(
                            pattern.line,
                            "expected a string literal after 'regex'",
                        ));
                    }
                }
                _ => {
                    return Err(GovernanceError::parse(
                        token.line,
                        format!("unknown declaration keyword '{}'", token.describe()),
                    ))
                }
            }
        }
    }

    fn sub_clause(&mut self, name: &str, start: usize) -> GovResult<()> {
        let token = self.expect_any(start)?;
        match &token.kind {
            TokenKind::Keyword(Keyword::Entity)
            | TokenKind::Keyword(Keyword::Relation)
            | TokenKind::Keyword(Keyword::Attribute) => Ok(()),
            TokenKind::Ident(parent) => {
                self.snapshot
                    .parent_of
                    .insert(name.to_string(), parent.clone());
                Ok(())
            }
            _ => Err(GovernanceError::parse(
                token.line,
                format!("expected a supertype after 'sub', found '{}'", token.describe()),
            )),
        }
    }

    fn owns_clause(&mut self, name: &str, start: usize) -> GovResult<()> {
        let attr = self.expect_ident(start, "an attribute after 'owns'")?;
        // `owns attr:override` and `owns attr as override` both narrow an inherited attribute
        if self.eat_symbol(':') {
            self.expect_ident(start, "an overridden attribute after ':'")?;
        } else if self.peek().is_some_and(|t| t.is_keyword(Keyword::As)) {
            self.pos += 1;
            self.expect_ident(start, "an overridden attribute after 'as'")?;
        }
        self.list_marker(start)?;
        self.snapshot
            .owns_of
            .entry(name.to_string())
            .or_default()
            .insert(attr);
        Ok(())
    }

    fn plays_clause(&mut self, name: &str, start: usize) -> GovResult<()> {
        let relation = self.expect_ident(start, "a relation after 'plays'")?;
        if !self.eat_symbol(':') {
            let line = self.peek().map(|t| t.line).unwrap_or(start);
            return Err(GovernanceError::parse(
                line,
                format!("expected '<relation>:<role>' after 'plays {}'", relation),
            ));
        }
        let role = self.expect_ident(start, "a role after ':'")?;
        self.snapshot
            .plays_of
            .entry(name.to_string())
            .or_default()
            .insert(format!("{}:{}", relation, role));
        Ok(())
    }

    fn relates_clause(&mut self, name: &str, start: usize) -> GovResult<()> {
        let role = self.expect_ident(start, "a role after 'relates'")?;
        if self.peek().is_some_and(|t| t.is_keyword(Keyword::As)) {
            self.pos += 1;
            self.expect_ident(start, "an overridden role after 'as'")?;
        }
        self.list_marker(start)?;
        self.snapshot
            .relates_of
            .entry(name.to_string())
            .or_default()
            .insert(role);
        Ok(())
    }

    /// Optional `[]` after an owned attribute or related role
    fn list_marker(&mut self, start: usize) -> GovResult<()> {
        if self.eat_symbol('[') && !self.eat_symbol(']') {
            return Err(GovernanceError::parse(start, "expected ']' after '['"));
        }
        Ok(())
    }

    /// Skip a parenthesised annotation argument list such as `@card(0..1)`
    fn annotation_args(&mut self, start: usize) -> GovResult<()> {
        if !self.eat_symbol('(') {
            return Ok(());
        }
        let mut depth = 1usize;
        while depth > 0 {
            let token = self.expect_any(start)?;
            if token.is_symbol('(') {
                depth += 1;
            } else if token.is_symbol(')') {
                depth -= 1;
            } else if token.is_symbol(';') {
                return Err(GovernanceError::parse(token.line, "unclosed annotation arguments"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SCHEMA: &str = r#"
define

# core provenance
attribute template-id, value string;
attribute owns-metadata, value string;
attribute note, value string @regex("^a#b$");

entity evidence @abstract,
    owns template-id @key,
    owns note,
    plays citation:source;

entity paper sub evidence,
    owns owns-metadata,
    plays citation:source;

relation citation,
    relates source,
    relates target @card(0..1);
"#;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_extracts_direct_capabilities() {
        let snapshot = CapabilitySnapshot::extract(SCHEMA).unwrap();

        assert_eq!(snapshot.parent_of.get("paper"), Some(&"evidence".to_string()));
        assert_eq!(snapshot.parent_of.get("evidence"), None);
        assert_eq!(snapshot.owns("evidence"), Some(&set(&["note", "template-id"])));
        assert_eq!(snapshot.owns("paper"), Some(&set(&["owns-metadata"])));
        assert_eq!(snapshot.plays("paper"), Some(&set(&["citation:source"])));
        assert_eq!(snapshot.relates_of.get("citation"), Some(&set(&["source", "target"])));
        assert!(snapshot.contains_type("owns-metadata"));
        assert!(snapshot.contains_type("citation"));
    }

    #[test]
    fn test_type_named_like_keyword_is_identifier() {
        let snapshot =
            CapabilitySnapshot::extract("entity owns-metadata, owns plays-count;").unwrap();
        assert_eq!(snapshot.owns("owns-metadata"), Some(&set(&["plays-count"])));
        assert_eq!(snapshot.types().len(), 1);
    }

    #[test]
    fn test_extraction_is_idempotent() {
        let first = CapabilitySnapshot::extract(SCHEMA).unwrap();
        let second = CapabilitySnapshot::extract(SCHEMA).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.checksum(), second.checksum());
    }

    #[test]
    fn test_legacy_sub_form_and_root_kinds() {
        let snapshot = CapabilitySnapshot::extract(
            "define person sub entity, owns name; employee sub person; name sub attribute, value string;",
        )
        .unwrap();
        assert_eq!(snapshot.parent_of.get("person"), None);
        assert_eq!(snapshot.parent_of.get("employee"), Some(&"person".to_string()));
        assert!(snapshot.contains_type("name"));
    }

    #[test]
    fn test_undefine_block_records_nothing() {
        let snapshot =
            CapabilitySnapshot::extract("define entity a; undefine owns x from a; define entity b;")
                .unwrap();
        assert_eq!(snapshot.types(), ["a", "b"].into_iter().collect());
    }

    #[test]
    fn test_checksum_ignores_declaration_order() {
        let a = CapabilitySnapshot::extract("entity a, owns x; entity b, owns y;").unwrap();
        let b = CapabilitySnapshot::extract("entity b, owns y;\nentity a, owns x;").unwrap();
        assert_eq!(a.checksum(), b.checksum());
    }

    #[test]
    fn test_unterminated_statement_fails() {
        let err = CapabilitySnapshot::extract("entity person, owns name").unwrap_err();
        assert!(err.to_string().contains("unterminated statement"));
    }

    #[test]
    fn test_unknown_keyword_fails() {
        let err = CapabilitySnapshot::extract("entity person, grows name;").unwrap_err();
        assert!(err.to_string().contains("unknown declaration keyword 'grows'"));

        let err = CapabilitySnapshot::extract("; 42 things;").unwrap_err();
        assert_eq!(err.code(), "PARSE_ERROR");
    }

    #[test]
    fn test_plays_requires_role() {
        let err = CapabilitySnapshot::extract("entity person, plays employment;").unwrap_err();
        assert!(err.to_string().contains("<relation>:<role>"));
    }
}
