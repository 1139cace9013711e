//! Recursive-descent parser from tokens to [`Module`]s.
//!
//! Constraints are recognized and skipped: the decoder never enforces them.
//! Parameterized assignments, information object classes and value sets are
//! rejected with a syntax error rather than being misread.

use thiserror::Error;

use crate::lexer::{tokenize, LexError, Spanned, Token};
use crate::types::{
    Alternative, Alternatives, Assignment, Class, Component, Components, DefaultValue,
    Enumeration, Module, Presence, StringKind, Tag, TagMode, TaggingDefault, TimeKind, Type,
};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ParseError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },
    #[error("unexpected end of schema text")]
    UnexpectedEnd,
}

pub fn parse(text: &str) -> Result<Vec<Module>, ParseError> {
    let tokens = tokenize(text)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        implied_extensibility: false,
    };
    let mut modules = Vec::new();
    while parser.peek().is_some() {
        modules.push(parser.module()?);
    }
    if modules.is_empty() {
        return Err(ParseError::UnexpectedEnd);
    }
    Ok(modules)
}

fn is_type_name(ident: &str) -> bool {
    ident.chars().next().is_some_and(char::is_uppercase)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    implied_extensibility: bool,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset).map(|s| &s.token)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or(self.tokens.last())
            .map_or(0, |s| s.line)
    }

    fn next(&mut self) -> Result<Token, ParseError> {
        let token = self
            .tokens
            .get(self.pos)
            .map(|s| s.token.clone())
            .ok_or(ParseError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(token)
    }

    fn syntax<T>(&self, message: impl Into<String>) -> Result<T, ParseError> {
        Err(ParseError::Syntax {
            line: self.line(),
            message: message.into(),
        })
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        self.keyword_at(0, keyword)
    }

    fn keyword_at(&self, offset: usize, keyword: &str) -> bool {
        matches!(self.peek_at(offset), Some(Token::Identifier(ident)) if ident == keyword)
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.is_keyword(keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), ParseError> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            self.syntax(format!("expected {keyword}, found {}", self.found()))
        }
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token) -> Result<(), ParseError> {
        if self.eat(token) {
            Ok(())
        } else {
            self.syntax(format!("expected {token:?}, found {}", self.found()))
        }
    }

    fn found(&self) -> String {
        match self.peek() {
            Some(Token::Identifier(ident)) => format!("'{ident}'"),
            Some(token) => format!("{token:?}"),
            None => "end of text".to_string(),
        }
    }

    fn identifier(&mut self) -> Result<String, ParseError> {
        match self.next()? {
            Token::Identifier(ident) => Ok(ident),
            other => {
                self.pos -= 1;
                self.syntax(format!("expected identifier, found {other:?}"))
            }
        }
    }

    // Skips a balanced group starting at the current (opening) token
    fn skip_group(&mut self, open: &Token, close: &Token) -> Result<(), ParseError> {
        self.expect(open)?;
        let mut depth = 1;
        while depth > 0 {
            let token = self.next()?;
            if &token == open {
                depth += 1;
            } else if &token == close {
                depth -= 1;
            }
        }
        Ok(())
    }

    fn skip_braces(&mut self) -> Result<(), ParseError> {
        self.skip_group(&Token::LeftBrace, &Token::RightBrace)
    }

    fn skip_constraints(&mut self) -> Result<(), ParseError> {
        while self.peek() == Some(&Token::LeftParen) {
            self.skip_group(&Token::LeftParen, &Token::RightParen)?;
        }
        Ok(())
    }

    fn module(&mut self) -> Result<Module, ParseError> {
        let name = self.identifier()?;
        if self.peek() == Some(&Token::LeftBrace) {
            self.skip_braces()?;
        }
        self.expect_keyword("DEFINITIONS")?;
        let mut tagging = TaggingDefault::Explicit;
        for (keyword, default) in [
            ("EXPLICIT", TaggingDefault::Explicit),
            ("IMPLICIT", TaggingDefault::Implicit),
            ("AUTOMATIC", TaggingDefault::Automatic),
        ] {
            if self.eat_keyword(keyword) {
                self.expect_keyword("TAGS")?;
                tagging = default;
                break;
            }
        }
        self.implied_extensibility = false;
        if self.eat_keyword("EXTENSIBILITY") {
            self.expect_keyword("IMPLIED")?;
            self.implied_extensibility = true;
        }
        self.expect(&Token::Assignment)?;
        self.expect_keyword("BEGIN")?;

        for clause in ["EXPORTS", "IMPORTS"] {
            if self.eat_keyword(clause) {
                while !self.eat(&Token::Semicolon) {
                    self.next()?;
                }
            }
        }

        let mut assignments = Vec::new();
        while !self.eat_keyword("END") {
            if let Some(assignment) = self.assignment()? {
                assignments.push(assignment);
            }
        }
        Ok(Module {
            name,
            tagging,
            assignments,
        })
    }

    // Returns None for value assignments, which are parsed and dropped
    fn assignment(&mut self) -> Result<Option<Assignment>, ParseError> {
        let line = self.line();
        let name = self.identifier()?;
        if is_type_name(&name) {
            match self.peek() {
                Some(Token::Assignment) => {
                    self.pos += 1;
                    let ty = self.ty()?;
                    Ok(Some(Assignment { name, ty, line }))
                }
                Some(Token::LeftBrace) => {
                    self.syntax(format!("parameterized assignment '{name}' is not supported"))
                }
                _ => self.syntax(format!(
                    "'{name}' is not a type assignment (value sets and object classes are not supported)"
                )),
            }
        } else {
            self.ty()?;
            self.expect(&Token::Assignment)?;
            self.skip_value()?;
            Ok(None)
        }
    }

    fn skip_value(&mut self) -> Result<(), ParseError> {
        match self.peek() {
            Some(Token::LeftBrace) => self.skip_braces(),
            Some(Token::Identifier(_)) => {
                self.pos += 1;
                if self.eat(&Token::Colon) {
                    self.skip_value()?;
                }
                Ok(())
            }
            Some(_) => {
                self.pos += 1;
                Ok(())
            }
            None => Err(ParseError::UnexpectedEnd),
        }
    }

    fn ty(&mut self) -> Result<Type, ParseError> {
        if self.peek() == Some(&Token::LeftBracket) {
            let tag = self.tag()?;
            let mode = if self.eat_keyword("IMPLICIT") {
                TagMode::Implicit
            } else if self.eat_keyword("EXPLICIT") {
                TagMode::Explicit
            } else {
                TagMode::Unspecified
            };
            let inner = self.ty()?;
            return Ok(Type::Tagged {
                tag,
                mode,
                inner: Box::new(inner),
            });
        }
        let ty = self.builtin_or_reference()?;
        self.skip_constraints()?;
        Ok(ty)
    }

    fn tag(&mut self) -> Result<Tag, ParseError> {
        self.expect(&Token::LeftBracket)?;
        let class = if self.eat_keyword("UNIVERSAL") {
            Class::Universal
        } else if self.eat_keyword("APPLICATION") {
            Class::Application
        } else if self.eat_keyword("PRIVATE") {
            Class::Private
        } else {
            Class::Context
        };
        let number = match self.next()? {
            Token::Number(n) if (0..=i128::from(u32::MAX)).contains(&n) => n as u32,
            other => {
                self.pos -= 1;
                return self.syntax(format!("expected tag number, found {other:?}"));
            }
        };
        self.expect(&Token::RightBracket)?;
        Ok(Tag { class, number })
    }

    fn builtin_or_reference(&mut self) -> Result<Type, ParseError> {
        let keyword = self.identifier()?;
        let ty = match keyword.as_str() {
            "BOOLEAN" => Type::Boolean,
            "NULL" => Type::Null,
            "INTEGER" => {
                if self.peek() == Some(&Token::LeftBrace) {
                    self.skip_braces()?;
                }
                Type::Integer
            }
            "ENUMERATED" => Type::Enumerated(self.enumeration()?),
            "OCTET" => {
                self.expect_keyword("STRING")?;
                Type::OctetString
            }
            "BIT" => {
                self.expect_keyword("STRING")?;
                if self.peek() == Some(&Token::LeftBrace) {
                    self.skip_braces()?;
                }
                Type::BitString
            }
            "OBJECT" => {
                self.expect_keyword("IDENTIFIER")?;
                Type::ObjectIdentifier
            }
            "UTCTime" => Type::Time(TimeKind::Utc),
            "GeneralizedTime" => Type::Time(TimeKind::Generalized),
            "SEQUENCE" | "SET" => {
                let is_sequence = keyword == "SEQUENCE";
                if self.peek() == Some(&Token::LeftBrace) {
                    let components = self.components()?;
                    if is_sequence {
                        Type::Sequence(components)
                    } else {
                        Type::Set(components)
                    }
                } else {
                    self.eat_keyword("SIZE");
                    self.skip_constraints()?;
                    self.expect_keyword("OF")?;
                    if matches!(self.peek(), Some(Token::Identifier(ident)) if !is_type_name(ident))
                    {
                        // named element, "SEQUENCE OF item Item"
                        self.pos += 1;
                    }
                    let element = Box::new(self.ty()?);
                    if is_sequence {
                        Type::SequenceOf(element)
                    } else {
                        Type::SetOf(element)
                    }
                }
            }
            "CHOICE" => Type::Choice(self.alternatives()?),
            "ANY" => {
                if self.eat_keyword("DEFINED") {
                    self.expect_keyword("BY")?;
                    self.identifier()?;
                }
                Type::Any
            }
            "REAL" | "EXTERNAL" | "EMBEDDED" | "RELATIVE-OID" | "INSTANCE" => {
                self.pos -= 1;
                return self.syntax(format!("type {keyword} is not supported"));
            }
            other => {
                if let Some(kind) = StringKind::from_keyword(other) {
                    Type::CharString(kind)
                } else if is_type_name(other) {
                    // "Module.Type" references name the type directly
                    if self.peek() == Some(&Token::Dot)
                        && matches!(self.peek_at(1), Some(Token::Identifier(_)))
                    {
                        self.pos += 1;
                        Type::Reference(self.identifier()?)
                    } else {
                        Type::Reference(keyword)
                    }
                } else {
                    self.pos -= 1;
                    return self.syntax(format!("expected a type, found '{other}'"));
                }
            }
        };
        Ok(ty)
    }

    // skips an exception specification, "! 1" or "! Type : value"
    fn skip_exception(&mut self) -> Result<(), ParseError> {
        if !self.eat(&Token::Exclamation) {
            return Ok(());
        }
        while !matches!(
            self.peek(),
            Some(Token::Comma) | Some(Token::RightBrace) | None
        ) {
            match self.peek() {
                Some(Token::LeftParen) => self.skip_group(&Token::LeftParen, &Token::RightParen)?,
                Some(Token::LeftBrace) => self.skip_braces()?,
                _ => self.pos += 1,
            }
        }
        Ok(())
    }

    fn enumeration(&mut self) -> Result<Enumeration, ParseError> {
        self.expect(&Token::LeftBrace)?;
        let mut named: Vec<(String, Option<i128>, bool)> = Vec::new();
        let mut extensible = self.implied_extensibility;
        let mut in_additions = false;
        loop {
            if self.eat(&Token::Ellipsis) {
                extensible = true;
                in_additions = true;
                self.skip_exception()?;
            } else {
                let name = self.identifier()?;
                let value = if self.eat(&Token::LeftParen) {
                    let value = match self.next()? {
                        Token::Number(n) => n,
                        other => {
                            self.pos -= 1;
                            return self.syntax(format!(
                                "expected enumeration value for '{name}', found {other:?}"
                            ));
                        }
                    };
                    self.expect(&Token::RightParen)?;
                    Some(value)
                } else {
                    None
                };
                named.push((name, value, in_additions));
            }
            if self.eat(&Token::RightBrace) {
                break;
            }
            self.expect(&Token::Comma)?;
        }

        // X.680 19.3: unnumbered root items take the smallest unused values,
        // unnumbered additions continue past the largest value so far
        let mut used: Vec<i128> = named.iter().filter_map(|(_, v, _)| *v).collect();
        let mut items = Vec::with_capacity(named.len());
        let mut next_root = 0;
        for (name, value, addition) in named {
            let value = match value {
                Some(v) => v,
                None if addition => used.iter().max().map_or(0, |max| max + 1),
                None => {
                    while used.contains(&next_root) {
                        next_root += 1;
                    }
                    next_root
                }
            };
            used.push(value);
            items.push((name, value));
        }
        Ok(Enumeration { items, extensible })
    }

    fn components(&mut self) -> Result<Components, ParseError> {
        self.expect(&Token::LeftBrace)?;
        let mut result = Components {
            components: Vec::new(),
            extensible: self.implied_extensibility,
        };
        if self.eat(&Token::RightBrace) {
            return Ok(result);
        }
        loop {
            if self.eat(&Token::Ellipsis) {
                result.extensible = true;
                self.skip_exception()?;
            } else if self.peek() == Some(&Token::LeftBracket)
                && self.peek_at(1) == Some(&Token::LeftBracket)
            {
                self.pos += 2;
                if matches!(self.peek(), Some(Token::Number(_)))
                    && self.peek_at(1) == Some(&Token::Colon)
                {
                    self.pos += 2;
                }
                loop {
                    result.components.push(self.component()?);
                    if !self.eat(&Token::Comma) {
                        break;
                    }
                }
                self.expect(&Token::RightBracket)?;
                self.expect(&Token::RightBracket)?;
            } else if self.is_keyword("COMPONENTS") && self.keyword_at(1, "OF") {
                return self.syntax("COMPONENTS OF is not supported");
            } else {
                result.components.push(self.component()?);
            }
            if self.eat(&Token::RightBrace) {
                break;
            }
            self.expect(&Token::Comma)?;
        }
        Ok(result)
    }

    fn component(&mut self) -> Result<Component, ParseError> {
        let name = self.identifier()?;
        let ty = self.ty()?;
        let presence = if self.eat_keyword("OPTIONAL") {
            Presence::Optional
        } else if self.eat_keyword("DEFAULT") {
            Presence::Default(self.default_value()?)
        } else {
            Presence::Required
        };
        Ok(Component { name, ty, presence })
    }

    fn default_value(&mut self) -> Result<DefaultValue, ParseError> {
        let value = match self.peek() {
            Some(Token::Identifier(ident)) if ident == "TRUE" => DefaultValue::Boolean(true),
            Some(Token::Identifier(ident)) if ident == "FALSE" => DefaultValue::Boolean(false),
            Some(Token::Identifier(ident)) if ident == "NULL" => DefaultValue::Null,
            Some(Token::Identifier(ident))
                if !is_type_name(ident) && self.peek_at(1) != Some(&Token::Colon) =>
            {
                DefaultValue::Identifier(ident.clone())
            }
            Some(Token::Number(n)) => DefaultValue::Integer(*n),
            _ => {
                self.skip_value()?;
                return Ok(DefaultValue::Unsupported);
            }
        };
        self.pos += 1;
        Ok(value)
    }

    fn alternatives(&mut self) -> Result<Alternatives, ParseError> {
        self.expect(&Token::LeftBrace)?;
        let mut result = Alternatives {
            alternatives: Vec::new(),
            extensible: self.implied_extensibility,
        };
        loop {
            if self.eat(&Token::Ellipsis) {
                result.extensible = true;
                self.skip_exception()?;
            } else if self.peek() == Some(&Token::LeftBracket)
                && self.peek_at(1) == Some(&Token::LeftBracket)
            {
                self.pos += 2;
                loop {
                    result.alternatives.push(self.alternative()?);
                    if !self.eat(&Token::Comma) {
                        break;
                    }
                }
                self.expect(&Token::RightBracket)?;
                self.expect(&Token::RightBracket)?;
            } else {
                result.alternatives.push(self.alternative()?);
            }
            if self.eat(&Token::RightBrace) {
                break;
            }
            self.expect(&Token::Comma)?;
        }
        Ok(result)
    }

    fn alternative(&mut self) -> Result<Alternative, ParseError> {
        let name = self.identifier()?;
        let ty = self.ty()?;
        for keyword in ["OPTIONAL", "DEFAULT"] {
            if self.is_keyword(keyword) {
                return self.syntax(format!(
                    "{keyword} is not allowed on CHOICE alternative '{name}'"
                ));
            }
        }
        Ok(Alternative { name, ty })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_module(body: &str) -> Module {
        let text = format!("Test DEFINITIONS IMPLICIT TAGS ::= BEGIN\n{body}\nEND");
        let mut modules = parse(&text).unwrap();
        assert_eq!(modules.len(), 1);
        modules.remove(0)
    }

    #[test]
    fn test_module_header() {
        let modules = parse(
            "GPRSChargingDataTypes { itu-t (0) identified-organization (4) etsi(0) }
             DEFINITIONS IMPLICIT TAGS ::= BEGIN
             IMPORTS CallReferenceNumber FROM MAP-CH-DataTypes { itu-t 0 };
             ChargingID ::= INTEGER (0..4294967295)
             END",
        )
        .unwrap();
        assert_eq!(modules[0].name, "GPRSChargingDataTypes");
        assert_eq!(modules[0].tagging, TaggingDefault::Implicit);
        assert_eq!(modules[0].assignments[0].name, "ChargingID");
        assert_eq!(modules[0].assignments[0].ty, Type::Integer);
    }

    #[test]
    fn test_tagged_set_with_optional_and_default() {
        let module = single_module(
            "Record ::= [APPLICATION 1] SET {
                recordType [0] INTEGER,
                servedIMSI [3] IMPLICIT OCTET STRING (SIZE (3..8)) OPTIONAL,
                significance [1] BOOLEAN DEFAULT FALSE,
                ...
             }",
        );
        let Type::Tagged { tag, mode, inner } = &module.assignments[0].ty else {
            panic!("expected tagged type");
        };
        assert_eq!(
            *tag,
            Tag {
                class: Class::Application,
                number: 1
            }
        );
        assert_eq!(*mode, TagMode::Unspecified);
        let Type::Set(components) = inner.as_ref() else {
            panic!("expected SET");
        };
        assert!(components.extensible);
        assert_eq!(components.components.len(), 3);
        assert_eq!(components.components[1].presence, Presence::Optional);
        assert_eq!(
            components.components[2].presence,
            Presence::Default(DefaultValue::Boolean(false))
        );
        assert!(matches!(
            components.components[1].ty,
            Type::Tagged {
                mode: TagMode::Implicit,
                ..
            }
        ));
    }

    #[test]
    fn test_sequence_of_variants() {
        let module = single_module(
            "A ::= SEQUENCE OF INTEGER
             B ::= SEQUENCE SIZE (1..10) OF item OCTET STRING
             C ::= SET (SIZE (1..4)) OF BOOLEAN",
        );
        assert_eq!(
            module.assignments[0].ty,
            Type::SequenceOf(Box::new(Type::Integer))
        );
        assert_eq!(
            module.assignments[1].ty,
            Type::SequenceOf(Box::new(Type::OctetString))
        );
        assert_eq!(module.assignments[2].ty, Type::SetOf(Box::new(Type::Boolean)));
    }

    #[test]
    fn test_enumeration_numbering() {
        let module = single_module("E ::= ENUMERATED { a, b(0), c, ..., d }");
        let Type::Enumerated(e) = &module.assignments[0].ty else {
            panic!("expected ENUMERATED");
        };
        assert_eq!(
            e.items,
            vec![
                ("a".to_string(), 1),
                ("b".to_string(), 0),
                ("c".to_string(), 2),
                ("d".to_string(), 3),
            ]
        );
        assert!(e.extensible);
    }

    #[test]
    fn test_value_assignments_are_dropped() {
        let module = single_module(
            "maxAddresses INTEGER ::= 15
             id-ext OBJECT IDENTIFIER ::= { iso 3 }
             A ::= BOOLEAN",
        );
        assert_eq!(module.assignments.len(), 1);
        assert_eq!(module.assignments[0].name, "A");
    }

    #[test]
    fn test_optional_inside_choice_is_rejected() {
        let err = parse(
            "T DEFINITIONS ::= BEGIN
             C ::= CHOICE { a INTEGER OPTIONAL, b BOOLEAN }
             END",
        )
        .unwrap_err();
        assert_eq!(
            err,
            ParseError::Syntax {
                line: 2,
                message: "OPTIONAL is not allowed on CHOICE alternative 'a'".to_string()
            }
        );
    }

    #[test]
    fn test_any_defined_by_and_version_brackets() {
        let module = single_module(
            "ManagementExtension ::= SEQUENCE {
                identifier OBJECT IDENTIFIER,
                [[ significance [1] BOOLEAN DEFAULT FALSE ]],
                information [2] ANY DEFINED BY identifier
             }",
        );
        let Type::Sequence(components) = &module.assignments[0].ty else {
            panic!("expected SEQUENCE");
        };
        let names: Vec<&str> = components
            .components
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(names, vec!["identifier", "significance", "information"]);
    }

    #[test]
    fn test_unsupported_constructs() {
        assert!(matches!(
            parse("T DEFINITIONS ::= BEGIN A ::= REAL END"),
            Err(ParseError::Syntax { .. })
        ));
        assert!(matches!(
            parse("T DEFINITIONS ::= BEGIN A { T } ::= SEQUENCE { a T } END"),
            Err(ParseError::Syntax { .. })
        ));
        assert!(matches!(
            parse("T DEFINITIONS ::= BEGIN A ::= SEQUENCE {"),
            Err(ParseError::UnexpectedEnd)
        ));
    }
}
