use std::fmt;

/// Deepest combined nesting of annotation arguments and `{...}` lists.
const MAX_NESTING: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Annotation {
    pub namespace: String,
    pub name: String,
    pub line: usize,
    pub args: Vec<Arg>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Arg {
    Named(String, Value),
    Positional(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Value {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Null,
    Ident(String),
    List(Vec<Arg>),
    Annotation(Annotation),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SyntaxError {
    pub line: usize,
    pub message: String,
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl Annotation {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.args.iter().find_map(|arg| match arg {
            Arg::Named(name, value) if name == key => Some(value),
            _ => None,
        })
    }

    /// Scalar argument rendered as text; `response=200` and `response="200"` read the same.
    pub fn string(&self, key: &str) -> Option<String> {
        self.get(key).and_then(Value::as_text)
    }

    pub fn bool(&self, key: &str) -> Option<bool> {
        match self.get(key)? {
            Value::Bool(value) => Some(*value),
            Value::String(value) | Value::Ident(value) => value.parse().ok(),
            _ => None,
        }
    }

    /// `tags={"a", "b"}` or a single `tags="a"`.
    pub fn strings(&self, key: &str) -> Vec<String> {
        match self.get(key) {
            Some(Value::List(items)) => items
                .iter()
                .filter_map(|item| match item {
                    Arg::Positional(value) => value.as_text(),
                    Arg::Named(..) => None,
                })
                .collect(),
            Some(value) => value.as_text().into_iter().collect(),
            None => Vec::new(),
        }
    }

    /// Annotations nested directly in this one, either positionally, as a named value, or
    /// inside a `{...}` list.
    pub fn nested(&self) -> Vec<&Annotation> {
        let mut out = Vec::new();
        for arg in &self.args {
            let value = match arg {
                Arg::Named(_, value) | Arg::Positional(value) => value,
            };
            collect_annotations(value, &mut out);
        }
        out
    }

    pub fn nested_named<'a>(
        &'a self,
        names: &'a [&'a str],
    ) -> impl Iterator<Item = &'a Annotation> + 'a {
        self.nested()
            .into_iter()
            .filter(move |child| names.iter().any(|name| *name == child.name))
    }
}

fn collect_annotations<'a>(value: &'a Value, out: &mut Vec<&'a Annotation>) {
    match value {
        Value::Annotation(annotation) => out.push(annotation),
        Value::List(items) => {
            for item in items {
                let value = match item {
                    Arg::Named(_, value) | Arg::Positional(value) => value,
                };
                collect_annotations(value, out);
            }
        }
        _ => {}
    }
}

impl Value {
    pub fn as_text(&self) -> Option<String> {
        match self {
            Value::String(value) | Value::Ident(value) => Some(value.clone()),
            Value::Integer(value) => Some(value.to_string()),
            Value::Float(value) => Some(value.to_string()),
            Value::Bool(value) => Some(value.to_string()),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Option<serde_json::Value> {
        match self {
            Value::String(value) | Value::Ident(value) => Some(value.clone().into()),
            Value::Integer(value) => Some((*value).into()),
            Value::Float(value) => serde_json::Number::from_f64(*value).map(Into::into),
            Value::Bool(value) => Some((*value).into()),
            Value::Null => Some(serde_json::Value::Null),
            Value::List(items) => Some(
                items
                    .iter()
                    .filter_map(|item| match item {
                        Arg::Positional(value) => value.to_json(),
                        Arg::Named(..) => None,
                    })
                    .collect(),
            ),
            Value::Annotation(_) => None,
        }
    }
}

/// Parses every annotation in a docblock whose namespace is one of `namespaces`.
///
/// `first_line` is the source line the docblock text starts on. Annotations outside the
/// namespaces (`@param`, `@package`, `@ORM\Column`) and `@` signs inside prose are skipped.
pub(crate) fn parse_docblock(
    text: &str,
    first_line: usize,
    namespaces: &[String],
) -> Result<Vec<Annotation>, SyntaxError> {
    let mut parser = Parser::new(text, first_line);
    let mut annotations = Vec::new();

    while let Some(ch) = parser.peek() {
        if ch != '@' || !parser.at_word_boundary() {
            parser.bump();
            continue;
        }
        let checkpoint = parser.checkpoint();
        parser.bump();
        let qualified = parser.qualified_name();
        let recognised = split_qualified(&qualified)
            .is_some_and(|(namespace, _)| namespaces.iter().any(|ns| ns == namespace));
        parser.restore(checkpoint);
        if recognised {
            annotations.push(parser.annotation()?);
        } else {
            parser.bump();
        }
    }

    Ok(annotations)
}

fn split_qualified(qualified: &str) -> Option<(&str, &str)> {
    qualified.rsplit_once('\\')
}

#[derive(Clone, Copy)]
struct Checkpoint {
    pos: usize,
    line: usize,
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
    line: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str, line: usize) -> Self {
        Self {
            src,
            pos: 0,
            line,
            depth: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        if ch == '\n' {
            self.line += 1;
        }
        Some(ch)
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            pos: self.pos,
            line: self.line,
        }
    }

    fn restore(&mut self, checkpoint: Checkpoint) {
        self.pos = checkpoint.pos;
        self.line = checkpoint.line;
    }

    fn at_word_boundary(&self) -> bool {
        self.src[..self.pos]
            .chars()
            .next_back()
            .is_none_or(|prev| prev.is_whitespace() || matches!(prev, '(' | '{' | ','))
    }

    fn error(&self, message: impl Into<String>) -> SyntaxError {
        SyntaxError {
            line: self.line,
            message: message.into(),
        }
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn ident(&mut self) -> String {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|ch| ch.is_alphanumeric() || ch == '_')
        {
            self.bump();
        }
        self.src[start..self.pos].to_string()
    }

    fn qualified_name(&mut self) -> String {
        let mut name = self.ident();
        while self.peek() == Some('\\') {
            self.bump();
            name.push('\\');
            name.push_str(&self.ident());
        }
        name
    }

    fn annotation(&mut self) -> Result<Annotation, SyntaxError> {
        let line = self.line;
        if self.bump() != Some('@') {
            return Err(self.error("expected '@'"));
        }
        let qualified = self.qualified_name();
        let Some((namespace, name)) = split_qualified(&qualified) else {
            return Err(self.error(format!("annotation '@{qualified}' has no namespace")));
        };
        if name.is_empty() {
            return Err(self.error(format!("annotation '@{qualified}' has an empty name")));
        }
        let (namespace, name) = (namespace.to_string(), name.to_string());

        let args = if self.peek() == Some('(') {
            self.bump();
            self.args(')', &format!("@{qualified}"))?
        } else {
            Vec::new()
        };

        Ok(Annotation {
            namespace,
            name,
            line,
            args,
        })
    }

    fn args(&mut self, close: char, owner: &str) -> Result<Vec<Arg>, SyntaxError> {
        if self.depth >= MAX_NESTING {
            return Err(self.error("annotation nesting too deep"));
        }
        self.depth += 1;
        let args = self.arg_list(close, owner);
        self.depth -= 1;
        args
    }

    fn arg_list(&mut self, close: char, owner: &str) -> Result<Vec<Arg>, SyntaxError> {
        let mut args = Vec::new();
        loop {
            self.skip_whitespace();
            if self.peek() == Some(close) {
                self.bump();
                return Ok(args);
            }
            args.push(self.arg()?);
            self.skip_whitespace();
            match self.peek() {
                Some(',') => {
                    self.bump();
                }
                Some(ch) if ch == close => {
                    self.bump();
                    return Ok(args);
                }
                Some(ch) => {
                    return Err(self.error(format!(
                        "expected ',' or '{close}' in {owner}, found '{ch}'"
                    )));
                }
                None => return Err(self.error(format!("unterminated {owner}"))),
            }
        }
    }

    fn arg(&mut self) -> Result<Arg, SyntaxError> {
        let checkpoint = self.checkpoint();
        let key = match self.peek() {
            Some('"') => Some(self.string()?),
            Some(ch) if ch.is_alphabetic() || ch == '_' => Some(self.ident()),
            _ => None,
        };
        if let Some(key) = key {
            self.skip_whitespace();
            if matches!(self.peek(), Some('=') | Some(':')) {
                self.bump();
                self.skip_whitespace();
                return Ok(Arg::Named(key, self.value()?));
            }
        }
        self.restore(checkpoint);
        Ok(Arg::Positional(self.value()?))
    }

    fn value(&mut self) -> Result<Value, SyntaxError> {
        match self.peek() {
            Some('"') => Ok(Value::String(self.string()?)),
            Some('{') => {
                self.bump();
                Ok(Value::List(self.args('}', "list")?))
            }
            Some('@') => Ok(Value::Annotation(self.annotation()?)),
            Some(ch) if ch.is_ascii_digit() || ch == '-' => self.number(),
            Some(ch) if ch.is_alphabetic() || ch == '_' => {
                let ident = self.ident();
                Ok(match ident.to_ascii_lowercase().as_str() {
                    "true" => Value::Bool(true),
                    "false" => Value::Bool(false),
                    "null" => Value::Null,
                    _ => Value::Ident(ident),
                })
            }
            Some(ch) => Err(self.error(format!("unexpected character '{ch}'"))),
            None => Err(self.error("unexpected end of docblock")),
        }
    }

    /// Double-quoted string; a doubled quote (`""`) is a literal quote.
    fn string(&mut self) -> Result<String, SyntaxError> {
        let start_line = self.line;
        self.bump();
        let mut out = String::new();
        loop {
            match self.bump() {
                Some('"') if self.peek() == Some('"') => {
                    self.bump();
                    out.push('"');
                }
                Some('"') => return Ok(out),
                Some(ch) => out.push(ch),
                None => {
                    return Err(SyntaxError {
                        line: start_line,
                        message: "unterminated string".to_string(),
                    });
                }
            }
        }
    }

    fn number(&mut self) -> Result<Value, SyntaxError> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.bump();
        }
        while self
            .peek()
            .is_some_and(|ch| ch.is_ascii_digit() || ch == '.')
        {
            self.bump();
        }
        let raw = &self.src[start..self.pos];
        if let Ok(value) = raw.parse::<i64>() {
            return Ok(Value::Integer(value));
        }
        raw.parse::<f64>()
            .map(Value::Float)
            .map_err(|_| self.error(format!("invalid number '{raw}'")))
    }
}
