use std::fmt;

use anyhow::{Context, Result, bail};

pub(crate) const OBJECT: &str = "java.lang.Object";

/// Structured type reference with canonical name and declared type arguments.
///
/// Arrays are carried as `Elem[]` with the element type as the single
/// argument, so collection unwrapping treats them uniformly.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct TypeRef {
    pub(crate) name: String,
    pub(crate) args: Vec<TypeRef>,
}

impl TypeRef {
    pub(crate) fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            args: Vec::new(),
        }
    }

    pub(crate) fn object() -> Self {
        Self::named(OBJECT)
    }

    /// First declared type argument, or `java.lang.Object` when absent.
    pub(crate) fn element_of(&self) -> TypeRef {
        self.args.first().cloned().unwrap_or_else(TypeRef::object)
    }

    pub(crate) fn is_array(&self) -> bool {
        self.name.ends_with("[]")
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.args.is_empty() {
            write!(f, "<")?;
            for (position, arg) in self.args.iter().enumerate() {
                if position > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{arg}")?;
            }
            write!(f, ">")?;
        }
        Ok(())
    }
}

/// Convert an internal class name (`com/example/Foo$Bar`) to canonical form.
pub(crate) fn canonical(internal: &str) -> String {
    internal.replace('/', ".")
}

/// Types occupying two local-variable slots.
pub(crate) fn is_wide(name: &str) -> bool {
    matches!(name, "long" | "double")
}

pub(crate) fn is_primitive(name: &str) -> bool {
    matches!(
        name,
        "boolean" | "byte" | "char" | "short" | "int" | "long" | "float" | "double" | "void"
    )
}

/// Container types recognized without consulting the class index.
pub(crate) fn is_known_collection(name: &str) -> bool {
    if name.ends_with("[]") {
        return true;
    }
    matches!(
        name,
        "java.util.Collection"
            | "java.util.List"
            | "java.util.ArrayList"
            | "java.util.LinkedList"
            | "java.util.Set"
            | "java.util.HashSet"
            | "java.util.LinkedHashSet"
            | "java.util.TreeSet"
            | "java.util.SortedSet"
            | "java.util.NavigableSet"
            | "java.util.Queue"
            | "java.util.Deque"
            | "java.util.ArrayDeque"
            | "java.util.stream.Stream"
    )
}

/// Parse a field-type descriptor or generic field-type signature.
///
/// The generic signature grammar is a superset of the descriptor grammar,
/// so one parser covers both; type variables and wildcards erase to
/// `java.lang.Object`.
pub(crate) fn parse_type(input: &str) -> Result<TypeRef> {
    let mut parser = Parser::new(input);
    let parsed = parser.type_signature()?;
    parser.expect_end()?;
    Ok(parsed)
}

/// Parse a method descriptor or generic method signature into
/// (parameter types, return type). Formal type parameter declarations and
/// throws clauses are skipped.
pub(crate) fn parse_method_type(input: &str) -> Result<(Vec<TypeRef>, TypeRef)> {
    let mut parser = Parser::new(input);
    parser.skip_formal_type_parameters()?;
    parser.expect(b'(')?;
    let mut parameters = Vec::new();
    while parser.peek() != Some(b')') {
        parameters.push(parser.type_signature()?);
    }
    parser.expect(b')')?;
    let return_type = parser.type_signature()?;
    // Trailing throws signatures carry no REST-relevant information.
    Ok((parameters, return_type))
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input: input.as_bytes(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn advance(&mut self) -> Result<u8> {
        let byte = self
            .peek()
            .with_context(|| format!("malformed signature: unexpected end in {:?}", self.text()))?;
        self.pos += 1;
        Ok(byte)
    }

    fn expect(&mut self, expected: u8) -> Result<()> {
        let byte = self.advance()?;
        if byte != expected {
            bail!(
                "malformed signature: expected {:?} at offset {} in {:?}",
                expected as char,
                self.pos - 1,
                self.text()
            );
        }
        Ok(())
    }

    fn expect_end(&self) -> Result<()> {
        if self.pos != self.input.len() {
            bail!(
                "malformed signature: trailing input at offset {} in {:?}",
                self.pos,
                self.text()
            );
        }
        Ok(())
    }

    fn text(&self) -> String {
        String::from_utf8_lossy(self.input).to_string()
    }

    fn type_signature(&mut self) -> Result<TypeRef> {
        let tag = self.advance()?;
        let parsed = match tag {
            b'Z' => TypeRef::named("boolean"),
            b'B' => TypeRef::named("byte"),
            b'C' => TypeRef::named("char"),
            b'S' => TypeRef::named("short"),
            b'I' => TypeRef::named("int"),
            b'J' => TypeRef::named("long"),
            b'F' => TypeRef::named("float"),
            b'D' => TypeRef::named("double"),
            b'V' => TypeRef::named("void"),
            b'L' => self.class_type_signature()?,
            b'[' => {
                let element = self.type_signature()?;
                TypeRef {
                    name: format!("{}[]", element.name),
                    args: vec![element],
                }
            }
            b'T' => {
                self.identifier_until(b';')?;
                TypeRef::object()
            }
            other => bail!(
                "malformed signature: unexpected {:?} at offset {} in {:?}",
                other as char,
                self.pos - 1,
                self.text()
            ),
        };
        Ok(parsed)
    }

    fn class_type_signature(&mut self) -> Result<TypeRef> {
        let mut name = self.identifier_until_any(&[b';', b'<', b'.'])?;
        let mut args = Vec::new();
        loop {
            match self.advance()? {
                b';' => break,
                b'<' => {
                    args = self.type_arguments()?;
                }
                // Inner class segment of a parameterized outer class.
                b'.' => {
                    let inner = self.identifier_until_any(&[b';', b'<', b'.'])?;
                    name.push('$');
                    name.push_str(&inner);
                    args.clear();
                }
                other => bail!(
                    "malformed signature: unexpected {:?} at offset {} in {:?}",
                    other as char,
                    self.pos - 1,
                    self.text()
                ),
            }
        }
        Ok(TypeRef {
            name: canonical(&name),
            args,
        })
    }

    fn type_arguments(&mut self) -> Result<Vec<TypeRef>> {
        let mut args = Vec::new();
        while self.peek() != Some(b'>') {
            match self.peek() {
                Some(b'*') => {
                    self.pos += 1;
                    args.push(TypeRef::object());
                }
                Some(b'+') | Some(b'-') => {
                    self.pos += 1;
                    args.push(self.type_signature()?);
                }
                _ => args.push(self.type_signature()?),
            }
        }
        self.expect(b'>')?;
        Ok(args)
    }

    fn identifier_until(&mut self, terminator: u8) -> Result<String> {
        let value = self.identifier_until_any(&[terminator])?;
        self.expect(terminator)?;
        Ok(value)
    }

    fn identifier_until_any(&mut self, terminators: &[u8]) -> Result<String> {
        let start = self.pos;
        while let Some(byte) = self.peek() {
            if terminators.contains(&byte) {
                let slice = &self.input[start..self.pos];
                return Ok(String::from_utf8_lossy(slice).to_string());
            }
            self.pos += 1;
        }
        bail!(
            "malformed signature: unterminated identifier in {:?}",
            self.text()
        );
    }

    /// Skip `<T:Ljava/lang/Object;...>` formal type parameter declarations.
    fn skip_formal_type_parameters(&mut self) -> Result<()> {
        if self.peek() != Some(b'<') {
            return Ok(());
        }
        self.pos += 1;
        let mut depth = 1usize;
        while depth > 0 {
            match self.advance()? {
                b'<' => depth += 1,
                b'>' => depth -= 1,
                _ => {}
            }
        }
        Ok(())
    }
}
