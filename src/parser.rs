//! Parser for the textual program description
//!
//! Parses programs like:
//! - `module { aie.device(ipu) { ... } }`
//! - `%t = aie.tile(0, 2)`
//! - `%buf = aie.buffer(%t) {sym_name = "a", size = 1024}`
//! - `aie.core(%t) { aie.use_lock(%l, acquire, 1) }`
//!
//! There is no recovery mode: the first error aborts the load.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::error::{CompileError, CompileResult};
use crate::ir::{Attribute, Module, OpId, Operation};
use crate::lexer::{Lexer, Spanned, Token};

/// Parser for program descriptions
pub struct Parser<'source> {
    source: &'source str,
    tokens: Vec<Spanned>,
    pos: usize,
    /// Values defined so far, in textual order
    defined: HashSet<String>,
}

impl<'source> Parser<'source> {
    pub fn new(source: &'source str) -> Self {
        Self {
            source,
            tokens: Vec::new(),
            pos: 0,
            defined: HashSet::new(),
        }
    }

    fn current(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(tok, _)| tok)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset).map(|(tok, _)| tok)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|(_, span)| span.start)
            .unwrap_or(self.source.len())
    }

    fn error(&self, msg: impl Into<String>) -> CompileError {
        CompileError::parse_error(format!("{} at byte {}", msg.into(), self.offset()))
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).map(|(tok, _)| tok.clone());
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn check(&self, expected: &Token) -> bool {
        self.current() == Some(expected)
    }

    fn expect(&mut self, expected: Token) -> CompileResult<()> {
        if self.check(&expected) {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!(
                "expected '{}', got {}",
                expected,
                self.describe_current()
            )))
        }
    }

    fn describe_current(&self) -> String {
        match self.current() {
            Some(tok) => format!("'{}'", tok),
            None => "end of input".to_string(),
        }
    }

    /// Parse a complete module
    pub fn parse_module(&mut self) -> CompileResult<Module> {
        self.tokens = Lexer::new(self.source).tokenize()?;
        self.pos = 0;
        self.defined.clear();

        let mut module = Module::new();

        if matches!(self.current(), Some(Token::Ident(name)) if name == "module") {
            self.advance();
            if self.at_attr_dict() {
                module.attributes = self.parse_attr_dict()?.into_iter().collect();
            }
            self.expect(Token::LBrace)?;
            self.parse_block(&mut module, None)?;
            self.expect(Token::RBrace)?;
        } else {
            while self.current().is_some() {
                self.parse_op(&mut module, None)?;
            }
        }

        if self.current().is_some() {
            return Err(self.error(format!(
                "unexpected {} after module",
                self.describe_current()
            )));
        }

        Ok(module)
    }

    /// Parse ops until the closing brace of the enclosing region
    fn parse_block(&mut self, module: &mut Module, parent: Option<OpId>) -> CompileResult<()> {
        while !self.check(&Token::RBrace) {
            if self.current().is_none() {
                return Err(self.error("unterminated region"));
            }
            self.parse_op(module, parent)?;
        }
        Ok(())
    }

    fn parse_op(&mut self, module: &mut Module, parent: Option<OpId>) -> CompileResult<OpId> {
        let mut result = None;
        if let Some(Token::Value(name)) = self.current() {
            let name = name.clone();
            self.advance();
            self.expect(Token::Equals)?;
            result = Some(name);
        }

        let name = match self.advance() {
            Some(Token::Ident(name)) => name,
            other => {
                self.pos = self.pos.saturating_sub(usize::from(other.is_some()));
                return Err(self.error(format!(
                    "expected operation name, got {}",
                    self.describe_current()
                )));
            }
        };

        let mut op = Operation::new(name);

        if self.check(&Token::LParen) {
            self.advance();
            if !self.check(&Token::RParen) {
                loop {
                    op.operands.push(self.parse_operand()?);
                    if self.check(&Token::Comma) {
                        self.advance();
                    } else {
                        break;
                    }
                }
            }
            self.expect(Token::RParen)?;
        }

        if self.at_attr_dict() {
            op.attributes = self.parse_attr_dict()?.into_iter().collect();
        }

        if let Some(result) = result {
            if !self.defined.insert(result.clone()) {
                return Err(self.error(format!("redefinition of value %{}", result)));
            }
            op.result = Some(result);
        }

        let has_region = self.check(&Token::LBrace);
        if has_region {
            op.region = Some(Vec::new());
        }
        let id = module.append(parent, op);

        if has_region {
            self.advance();
            self.parse_block(module, Some(id))?;
            self.expect(Token::RBrace)?;
        }

        Ok(id)
    }

    fn parse_operand(&mut self) -> CompileResult<Attribute> {
        match self.current().cloned() {
            Some(Token::Value(name)) => {
                if !self.defined.contains(&name) {
                    return Err(self.error(format!("use of undefined value %{}", name)));
                }
                self.advance();
                Ok(Attribute::Value(name))
            }
            _ => self.parse_attr(),
        }
    }

    /// `{` followed by `ident =` starts an attribute dictionary, not a region
    fn at_attr_dict(&self) -> bool {
        self.check(&Token::LBrace)
            && matches!(self.peek_at(1), Some(Token::Ident(_)))
            && matches!(self.peek_at(2), Some(Token::Equals))
    }

    fn parse_attr_dict(&mut self) -> CompileResult<Vec<(String, Attribute)>> {
        self.expect(Token::LBrace)?;
        let mut entries = Vec::new();
        loop {
            let key = match self.advance() {
                Some(Token::Ident(key)) => key,
                _ => return Err(self.error("expected attribute name")),
            };
            self.expect(Token::Equals)?;
            entries.push((key, self.parse_attr()?));
            if self.check(&Token::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        self.expect(Token::RBrace)?;
        Ok(entries)
    }

    fn parse_attr(&mut self) -> CompileResult<Attribute> {
        match self.current().cloned() {
            Some(Token::Int(n)) => {
                self.advance();
                Ok(Attribute::Int(n))
            }
            Some(Token::Str(s)) => {
                self.advance();
                Ok(Attribute::Str(s))
            }
            Some(Token::Ident(s)) => {
                self.advance();
                Ok(Attribute::Ident(s))
            }
            Some(Token::Symbol(s)) => {
                self.advance();
                Ok(Attribute::Symbol(s))
            }
            Some(Token::LBracket) => {
                self.advance();
                let mut items = Vec::new();
                if !self.check(&Token::RBracket) {
                    loop {
                        items.push(self.parse_attr()?);
                        if self.check(&Token::Comma) {
                            self.advance();
                        } else {
                            break;
                        }
                    }
                }
                self.expect(Token::RBracket)?;
                Ok(Attribute::Array(items))
            }
            _ => Err(self.error(format!(
                "expected a value, got {}",
                self.describe_current()
            ))),
        }
    }
}

/// Parse a program description from source text
pub fn parse_module(source: &str) -> CompileResult<Module> {
    Parser::new(source).parse_module()
}

/// Read and parse a program description file
pub fn load_module(path: &Path) -> CompileResult<Module> {
    let source = fs::read_to_string(path).map_err(|source| CompileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_module(&source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const PROGRAM: &str = r#"
        module {
          aie.device(ipu) {
            %t = aie.tile(0, 2)
            %buf = aie.buffer(%t) {size = 256, sym_name = "a"}
            aie.core(%t) {
              memref.store(7, %buf)
              aie.end
            }
          }
        }
    "#;

    #[test]
    fn test_parse_nested_module() {
        let module = parse_module(PROGRAM).unwrap();
        let devices = module.devices();
        assert_eq!(devices.len(), 1);

        let device = module.op(devices[0]);
        assert_eq!(device.operand_str(0), Some("ipu"));

        let buffers = module.find_all("aie.buffer");
        let buffer = module.op(buffers[0]);
        assert_eq!(buffer.result.as_deref(), Some("buf"));
        assert_eq!(buffer.int_attr("size"), Some(256));
        assert_eq!(buffer.str_attr("sym_name"), Some("a"));

        let core = module.find_all("aie.core")[0];
        assert_eq!(module.children(Some(core)).len(), 2);
    }

    #[test]
    fn test_print_round_trip() {
        let module = parse_module(PROGRAM).unwrap();
        let printed = module.to_string();
        let reparsed = parse_module(&printed).unwrap();
        assert_eq!(reparsed.to_string(), printed);
    }

    #[test]
    fn test_bare_op_list() {
        let module = parse_module("%t = aie.tile(1, 1)\naie.end").unwrap();
        assert_eq!(module.body().len(), 2);
    }

    #[test]
    fn test_array_attribute() {
        let module = parse_module("aie.thing {dims = [1, 2, 3]}").unwrap();
        let op = module.op(module.body()[0]);
        assert_eq!(
            op.attr("dims"),
            Some(&Attribute::Array(vec![
                Attribute::Int(1),
                Attribute::Int(2),
                Attribute::Int(3)
            ]))
        );
    }

    #[test]
    fn test_undefined_value_fails() {
        let err = parse_module("aie.buffer(%missing)").unwrap_err();
        assert!(err.to_string().contains("undefined value %missing"));
    }

    #[test]
    fn test_redefinition_fails() {
        let err = parse_module("%t = aie.tile(0, 1)\n%t = aie.tile(0, 2)").unwrap_err();
        assert!(err.to_string().contains("redefinition"));
    }

    #[test]
    fn test_unterminated_region_fails() {
        assert!(parse_module("module { aie.device(ipu) {").is_err());
    }

    #[test]
    fn test_missing_op_name_fails() {
        let err = parse_module("module { = }").unwrap_err();
        assert!(err.to_string().contains("expected operation name"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_module(Path::new("/nonexistent/prog.mlir")).unwrap_err();
        assert!(matches!(err, CompileError::Io { .. }));
    }
}
