//! `{if}` block evaluation over a pool of known values.
//!
//! Blocks take the form `{if EXPR}…{if:elseif EXPR}…{if:else}…{/if}` and may
//! nest. In [`Resolution::KnownOnly`] mode a block is only evaluated when
//! every name it references is known; other blocks are left verbatim so a
//! later pass can see more values. [`Resolution::All`] treats unknown names
//! as empty strings and evaluates everything.

use super::error::DomainError;

const IF_OPEN: &str = "{if ";
const ELSEIF_OPEN: &str = "{if:elseif ";
const ELSE_TAG: &str = "{if:else}";
const END_TAG: &str = "{/if}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    KnownOnly,
    All,
}

/// Evaluate conditional blocks in `text`, looking names up through `lookup`.
pub fn evaluate<F>(text: &str, mode: Resolution, lookup: &F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(text.len());
    let mut pos = 0;

    while let Some((start, mark_end, mark)) = next_mark(text, pos) {
        out.push_str(&text[pos..start]);
        let Mark::If(_) = mark else {
            // Stray branch markers outside a block stay literal.
            out.push_str(&text[start..mark_end]);
            pos = mark_end;
            continue;
        };
        let Some(block) = parse_block(text, start) else {
            out.push_str(&text[start..mark_end]);
            pos = mark_end;
            continue;
        };

        match select_branch(&block, mode, lookup) {
            Some(Some(range)) => out.push_str(&evaluate(&text[range.0..range.1], mode, lookup)),
            Some(None) => {}
            None => out.push_str(&text[start..block.end]),
        }
        pos = block.end;
    }

    out.push_str(&text[pos..]);
    out
}

/// Whether `text` still contains conditional syntax.
pub fn has_conditionals(text: &str) -> bool {
    text.contains(IF_OPEN)
}

#[derive(Debug)]
enum Mark {
    If(String),
    ElseIf(String),
    Else,
    End,
}

struct Block {
    branches: Vec<(Option<String>, (usize, usize))>,
    end: usize,
}

fn next_mark(text: &str, from: usize) -> Option<(usize, usize, Mark)> {
    let mut search = from;
    while let Some(rel) = text[search..].find('{') {
        let start = search + rel;
        let rest = &text[start..];
        if rest.starts_with(END_TAG) {
            return Some((start, start + END_TAG.len(), Mark::End));
        }
        if rest.starts_with(ELSE_TAG) {
            return Some((start, start + ELSE_TAG.len(), Mark::Else));
        }
        if rest.starts_with(ELSEIF_OPEN) {
            if let Some(close) = tag_close(text, start + ELSEIF_OPEN.len()) {
                let expr = text[start + ELSEIF_OPEN.len()..close].trim().to_string();
                return Some((start, close + 1, Mark::ElseIf(expr)));
            }
        } else if rest.starts_with(IF_OPEN) {
            if let Some(close) = tag_close(text, start + IF_OPEN.len()) {
                let expr = text[start + IF_OPEN.len()..close].trim().to_string();
                return Some((start, close + 1, Mark::If(expr)));
            }
        }
        search = start + 1;
    }
    None
}

/// Find the `}` closing a tag whose expression starts at `from`, skipping
/// quoted strings.
fn tag_close(text: &str, from: usize) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (offset, c) in text[from..].char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '}') => return Some(from + offset),
            (None, '{') => return None,
            _ => {}
        }
    }
    None
}

fn parse_block(text: &str, start: usize) -> Option<Block> {
    let (_, open_end, Mark::If(expr)) = next_mark(text, start)? else {
        return None;
    };

    let mut branches = Vec::new();
    let mut condition = Some(expr);
    let mut content_start = open_end;
    let mut depth = 0usize;
    let mut pos = open_end;

    while let Some((mark_start, mark_end, mark)) = next_mark(text, pos) {
        match mark {
            Mark::If(_) => depth += 1,
            Mark::End if depth > 0 => depth -= 1,
            Mark::End => {
                branches.push((condition.take(), (content_start, mark_start)));
                return Some(Block {
                    branches,
                    end: mark_end,
                });
            }
            Mark::ElseIf(expr) if depth == 0 => {
                branches.push((condition.replace(expr), (content_start, mark_start)));
                content_start = mark_end;
            }
            Mark::Else if depth == 0 => {
                branches.push((condition.take(), (content_start, mark_start)));
                content_start = mark_end;
            }
            _ => {}
        }
        pos = mark_end;
    }
    None
}

/// `None` leaves the block untouched, `Some(None)` drops it, `Some(Some(r))`
/// keeps the chosen branch content.
fn select_branch<F>(block: &Block, mode: Resolution, lookup: &F) -> Option<Option<(usize, usize)>>
where
    F: Fn(&str) -> Option<String>,
{
    let mut parsed = Vec::with_capacity(block.branches.len());
    for (condition, range) in &block.branches {
        let expr = match condition {
            Some(source) => match parse_expression(source) {
                Ok(expr) => Some(expr),
                Err(_) if mode == Resolution::KnownOnly => return None,
                Err(_) => Some(Expr::Literal(String::new())),
            },
            None => None,
        };
        parsed.push((expr, *range));
    }

    if mode == Resolution::KnownOnly {
        let all_known = parsed
            .iter()
            .filter_map(|(expr, _)| expr.as_ref())
            .all(|expr| expr.names().iter().all(|name| lookup(name).is_some()));
        if !all_known {
            return None;
        }
    }

    for (expr, range) in parsed {
        match expr {
            Some(expr) if truthy(&expr.eval(lookup)) => return Some(Some(range)),
            Some(_) => {}
            None => return Some(Some(range)),
        }
    }
    Some(None)
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(String),
    Name(String),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare(Box<Expr>, CmpOp, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl Expr {
    fn names(&self) -> Vec<&str> {
        match self {
            Self::Literal(_) => Vec::new(),
            Self::Name(name) => vec![name.as_str()],
            Self::Not(inner) => inner.names(),
            Self::And(a, b) | Self::Or(a, b) | Self::Compare(a, _, b) => {
                let mut names = a.names();
                names.extend(b.names());
                names
            }
        }
    }

    fn eval<F>(&self, lookup: &F) -> String
    where
        F: Fn(&str) -> Option<String>,
    {
        match self {
            Self::Literal(value) => value.clone(),
            Self::Name(name) => lookup(name).unwrap_or_default(),
            Self::Not(inner) => bool_value(!truthy(&inner.eval(lookup))),
            Self::And(a, b) => bool_value(truthy(&a.eval(lookup)) && truthy(&b.eval(lookup))),
            Self::Or(a, b) => bool_value(truthy(&a.eval(lookup)) || truthy(&b.eval(lookup))),
            Self::Compare(a, op, b) => bool_value(compare(&a.eval(lookup), *op, &b.eval(lookup))),
        }
    }
}

fn bool_value(value: bool) -> String {
    if value { "1" } else { "" }.to_string()
}

fn truthy(value: &str) -> bool {
    !value.is_empty() && value != "0"
}

fn compare(left: &str, op: CmpOp, right: &str) -> bool {
    let ordering = match (left.trim().parse::<f64>(), right.trim().parse::<f64>()) {
        (Ok(a), Ok(b)) => a.total_cmp(&b),
        _ => left.cmp(right),
    };
    match op {
        CmpOp::Eq => ordering.is_eq(),
        CmpOp::Ne => ordering.is_ne(),
        CmpOp::Lt => ordering.is_lt(),
        CmpOp::Gt => ordering.is_gt(),
        CmpOp::Le => ordering.is_le(),
        CmpOp::Ge => ordering.is_ge(),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Str(String),
    Word(String),
    Cmp(CmpOp),
    Not,
    And,
    Or,
    Open,
    Close,
}

fn tokenize(source: &str) -> Result<Vec<Token>, DomainError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            _ if c.is_whitespace() => i += 1,
            '"' | '\'' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|&q| q == c)
                    .ok_or_else(|| DomainError::validation("unterminated string in conditional"))?;
                tokens.push(Token::Str(chars[i + 1..i + 1 + end].iter().collect()));
                i += end + 2;
            }
            '(' => {
                tokens.push(Token::Open);
                i += 1;
            }
            ')' => {
                tokens.push(Token::Close);
                i += 1;
            }
            '&' if next == Some('&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if next == Some('|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '=' if next == Some('=') => {
                tokens.push(Token::Cmp(CmpOp::Eq));
                i += 2;
            }
            '!' if next == Some('=') => {
                tokens.push(Token::Cmp(CmpOp::Ne));
                i += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '<' | '>' => {
                let inclusive = next == Some('=');
                tokens.push(Token::Cmp(match (c, inclusive) {
                    ('<', false) => CmpOp::Lt,
                    ('<', true) => CmpOp::Le,
                    ('>', false) => CmpOp::Gt,
                    _ => CmpOp::Ge,
                }));
                i += if inclusive { 2 } else { 1 };
            }
            _ if is_word_char(c) => {
                let len = chars[i..].iter().take_while(|&&w| is_word_char(w)).count();
                let word: String = chars[i..i + len].iter().collect();
                tokens.push(match word.to_ascii_uppercase().as_str() {
                    "AND" => Token::And,
                    "OR" => Token::Or,
                    _ => Token::Word(word),
                });
                i += len;
            }
            other => {
                return Err(DomainError::validation(format!(
                    "unexpected `{other}` in conditional"
                )));
            }
        }
    }
    Ok(tokens)
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | ':' | '-' | '.')
}

fn parse_expression(source: &str) -> Result<Expr, DomainError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.or()?;
    if parser.pos != parser.tokens.len() {
        return Err(DomainError::validation(format!(
            "trailing tokens in conditional `{source}`"
        )));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn or(&mut self) -> Result<Expr, DomainError> {
        let mut left = self.and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            left = Expr::Or(Box::new(left), Box::new(self.and()?));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, DomainError> {
        let mut left = self.unary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            left = Expr::And(Box::new(left), Box::new(self.unary()?));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, DomainError> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            return Ok(Expr::Not(Box::new(self.unary()?)));
        }
        let left = self.atom()?;
        if let Some(Token::Cmp(op)) = self.peek().cloned() {
            self.pos += 1;
            let right = self.atom()?;
            return Ok(Expr::Compare(Box::new(left), op, Box::new(right)));
        }
        Ok(left)
    }

    fn atom(&mut self) -> Result<Expr, DomainError> {
        match self.bump() {
            Some(Token::Str(value)) => Ok(Expr::Literal(value)),
            Some(Token::Word(word)) => Ok(word_expr(word)),
            Some(Token::Open) => {
                let inner = self.or()?;
                match self.bump() {
                    Some(Token::Close) => Ok(inner),
                    _ => Err(DomainError::validation("unbalanced parenthesis in conditional")),
                }
            }
            other => Err(DomainError::validation(format!(
                "unexpected token {other:?} in conditional"
            ))),
        }
    }
}

fn word_expr(word: String) -> Expr {
    if word.parse::<f64>().is_ok() {
        return Expr::Literal(word);
    }
    match word.to_ascii_lowercase().as_str() {
        "true" => Expr::Literal("1".to_string()),
        "false" => Expr::Literal(String::new()),
        _ => Expr::Name(word),
    }
}
