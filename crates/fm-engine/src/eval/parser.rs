use super::lexer::{Tok, Token, tokenize};
use crate::{Error, Result};

pub(crate) const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnaryOp {
    Not,
    Neg,
    Plus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    StrictEq,
    StrictNe,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Num(f64),
    Str(String),
    Bool(bool),
    Null,
    Undefined,
    Ident(String),
    List(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call(Box<Expr>, Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Await(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Cond(Box<Expr>, Box<Expr>, Box<Expr>),
    Assign(String, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Stmt {
    Let(String, Expr),
    Expr(Expr),
}

const KEYWORDS: &[&str] = &[
    "let", "const", "var", "true", "false", "null", "undefined", "await",
];

pub(crate) fn parse(src: &str) -> Result<Vec<Stmt>> {
    let mut parser = Parser {
        tokens: tokenize(src)?,
        pos: 0,
        depth: 0,
    };
    parser.program()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> &Tok {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].tok
    }

    fn offset(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].offset
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn error<T>(&self, message: impl Into<String>) -> Result<T> {
        Err(Error::Parse {
            offset: self.offset(),
            message: message.into(),
        })
    }

    fn at(&self, punct: &str) -> bool {
        matches!(self.peek(), Tok::Punct(p) if *p == punct)
    }

    fn eat(&mut self, punct: &str) -> bool {
        if self.at(punct) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, punct: &str) -> Result<()> {
        if self.eat(punct) {
            Ok(())
        } else {
            self.error(format!("expected `{punct}`, found {}", describe(self.peek())))
        }
    }

    fn at_keyword(&self, word: &str) -> bool {
        matches!(self.peek(), Tok::Ident(w) if w == word)
    }

    fn enter(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return self.error(format!("expression nested deeper than {MAX_DEPTH} levels"));
        }
        Ok(())
    }

    fn program(&mut self) -> Result<Vec<Stmt>> {
        let mut stmts = Vec::new();
        loop {
            while self.eat(";") {}
            if *self.peek() == Tok::Eof {
                return Ok(stmts);
            }
            stmts.push(self.statement()?);
            if !self.eat(";") && *self.peek() != Tok::Eof {
                return self.error(format!("expected `;`, found {}", describe(self.peek())));
            }
        }
    }

    fn statement(&mut self) -> Result<Stmt> {
        if self.at_keyword("let") || self.at_keyword("const") || self.at_keyword("var") {
            self.advance();
            let name = self.binding_name()?;
            self.expect("=")?;
            return Ok(Stmt::Let(name, self.expression()?));
        }
        Ok(Stmt::Expr(self.expression()?))
    }

    fn binding_name(&mut self) -> Result<String> {
        match self.advance() {
            Tok::Ident(name) if !KEYWORDS.contains(&name.as_str()) => Ok(name),
            other => self.error(format!("expected a name, found {}", describe(&other))),
        }
    }

    fn expression(&mut self) -> Result<Expr> {
        self.enter()?;
        let expr = self.assignment();
        self.depth -= 1;
        expr
    }

    fn assignment(&mut self) -> Result<Expr> {
        let target = self.conditional()?;
        if self.at("=") {
            let Expr::Ident(name) = target else {
                return self.error("only plain names can be assigned");
            };
            self.advance();
            return Ok(Expr::Assign(name, Box::new(self.expression()?)));
        }
        Ok(target)
    }

    fn conditional(&mut self) -> Result<Expr> {
        let test = self.or()?;
        if !self.eat("?") {
            return Ok(test);
        }
        let then = self.expression()?;
        self.expect(":")?;
        let otherwise = self.expression()?;
        Ok(Expr::Cond(Box::new(test), Box::new(then), Box::new(otherwise)))
    }

    /// Every operator folded into a chain nests the tree one level deeper,
    /// so it counts against the depth limit until the chain is closed.
    fn leave(&mut self, folds: usize) {
        self.depth -= folds;
    }

    fn or(&mut self) -> Result<Expr> {
        let mut left = self.and()?;
        let mut folds = 0;
        while self.eat("||") {
            self.enter()?;
            folds += 1;
            left = Expr::Or(Box::new(left), Box::new(self.and()?));
        }
        self.leave(folds);
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr> {
        let mut left = self.equality()?;
        let mut folds = 0;
        while self.eat("&&") {
            self.enter()?;
            folds += 1;
            left = Expr::And(Box::new(left), Box::new(self.equality()?));
        }
        self.leave(folds);
        Ok(left)
    }

    fn binary_level(
        &mut self,
        ops: &[(&str, BinOp)],
        next: fn(&mut Self) -> Result<Expr>,
    ) -> Result<Expr> {
        let mut left = next(self)?;
        let mut folds = 0;
        'outer: loop {
            for (punct, op) in ops {
                if self.eat(punct) {
                    self.enter()?;
                    folds += 1;
                    left = Expr::Binary(*op, Box::new(left), Box::new(next(self)?));
                    continue 'outer;
                }
            }
            self.leave(folds);
            return Ok(left);
        }
    }

    fn equality(&mut self) -> Result<Expr> {
        self.binary_level(
            &[
                ("===", BinOp::StrictEq),
                ("!==", BinOp::StrictNe),
                ("==", BinOp::Eq),
                ("!=", BinOp::Ne),
            ],
            Self::relational,
        )
    }

    fn relational(&mut self) -> Result<Expr> {
        self.binary_level(
            &[
                ("<=", BinOp::Le),
                (">=", BinOp::Ge),
                ("<", BinOp::Lt),
                (">", BinOp::Gt),
            ],
            Self::additive,
        )
    }

    fn additive(&mut self) -> Result<Expr> {
        self.binary_level(&[("+", BinOp::Add), ("-", BinOp::Sub)], Self::multiplicative)
    }

    fn multiplicative(&mut self) -> Result<Expr> {
        self.binary_level(
            &[("*", BinOp::Mul), ("/", BinOp::Div), ("%", BinOp::Rem)],
            Self::unary,
        )
    }

    fn unary(&mut self) -> Result<Expr> {
        let op = if self.eat("!") {
            Some(UnaryOp::Not)
        } else if self.eat("-") {
            Some(UnaryOp::Neg)
        } else if self.eat("+") {
            Some(UnaryOp::Plus)
        } else {
            None
        };
        let is_await = op.is_none() && self.at_keyword("await");
        if op.is_none() && !is_await {
            return self.postfix();
        }
        if is_await {
            self.advance();
        }

        self.enter()?;
        let operand = self.unary();
        self.depth -= 1;
        let operand = Box::new(operand?);
        Ok(match op {
            Some(op) => Expr::Unary(op, operand),
            None => Expr::Await(operand),
        })
    }

    fn postfix(&mut self) -> Result<Expr> {
        let mut expr = self.primary()?;
        let mut folds = 0;
        loop {
            if self.at(".") || self.at("[") || self.at("(") {
                self.enter()?;
                folds += 1;
            }
            if self.eat(".") {
                match self.advance() {
                    Tok::Ident(name) => expr = Expr::Member(Box::new(expr), name),
                    other => {
                        return self.error(format!(
                            "expected a property name, found {}",
                            describe(&other)
                        ));
                    }
                }
            } else if self.eat("[") {
                let index = self.expression()?;
                self.expect("]")?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else if self.eat("(") {
                let args = self.list_items(")")?;
                expr = Expr::Call(Box::new(expr), args);
            } else {
                self.leave(folds);
                return Ok(expr);
            }
        }
    }

    fn list_items(&mut self, close: &str) -> Result<Vec<Expr>> {
        let mut items = Vec::new();
        while !self.eat(close) {
            items.push(self.expression()?);
            if !self.eat(",") {
                self.expect(close)?;
                break;
            }
        }
        Ok(items)
    }

    fn primary(&mut self) -> Result<Expr> {
        let offset = self.offset();
        match self.advance() {
            Tok::Num(n) => Ok(Expr::Num(n)),
            Tok::Str(s) => Ok(Expr::Str(s)),
            Tok::Ident(word) => Ok(match word.as_str() {
                "true" => Expr::Bool(true),
                "false" => Expr::Bool(false),
                "null" => Expr::Null,
                "undefined" => Expr::Undefined,
                w if KEYWORDS.contains(&w) => {
                    return Err(Error::Parse {
                        offset,
                        message: format!("unexpected keyword `{w}`"),
                    });
                }
                _ => Expr::Ident(word),
            }),
            Tok::Punct("(") => {
                let inner = self.expression()?;
                self.expect(")")?;
                Ok(inner)
            }
            Tok::Punct("[") => Ok(Expr::List(self.list_items("]")?)),
            Tok::Punct("{") => self.object(),
            other => Err(Error::Parse {
                offset,
                message: format!("unexpected {}", describe(&other)),
            }),
        }
    }

    fn object(&mut self) -> Result<Expr> {
        let mut fields = Vec::new();
        while !self.eat("}") {
            let key = match self.advance() {
                Tok::Ident(key) | Tok::Str(key) => key,
                other => return self.error(format!("expected a key, found {}", describe(&other))),
            };
            self.expect(":")?;
            fields.push((key, self.expression()?));
            if !self.eat(",") {
                self.expect("}")?;
                break;
            }
        }
        Ok(Expr::Object(fields))
    }
}

fn describe(tok: &Tok) -> String {
    match tok {
        Tok::Num(n) => format!("number {n}"),
        Tok::Str(s) => format!("string {s:?}"),
        Tok::Ident(w) => format!("`{w}`"),
        Tok::Punct(p) => format!("`{p}`"),
        Tok::Eof => "end of expression".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expr(src: &str) -> Expr {
        match parse(src).unwrap().remove(0) {
            Stmt::Expr(e) => e,
            other => panic!("not an expression: {other:?}"),
        }
    }

    #[test]
    fn precedence_binds_multiplication_tighter() {
        assert_eq!(
            expr("1 + 2 * 3"),
            Expr::Binary(
                BinOp::Add,
                Box::new(Expr::Num(1.0)),
                Box::new(Expr::Binary(
                    BinOp::Mul,
                    Box::new(Expr::Num(2.0)),
                    Box::new(Expr::Num(3.0))
                ))
            )
        );
    }

    #[test]
    fn method_calls_chain() {
        assert_eq!(
            expr("this.ssh('hostname').trim()"),
            Expr::Call(
                Box::new(Expr::Member(
                    Box::new(Expr::Call(
                        Box::new(Expr::Member(Box::new(Expr::Ident("this".into())), "ssh".into())),
                        vec![Expr::Str("hostname".into())]
                    )),
                    "trim".into()
                )),
                vec![]
            )
        );
    }

    #[test]
    fn statements_split_on_semicolons() {
        let program = parse("let x = 1; print(x);").unwrap();
        assert_eq!(program.len(), 2);
        assert!(matches!(&program[0], Stmt::Let(name, Expr::Num(_)) if name == "x"));
    }

    #[test]
    fn trailing_commas_and_literals() {
        assert!(matches!(expr("[1, 2,]"), Expr::List(items) if items.len() == 2));
        assert!(matches!(expr("{a: 1, 'b c': 2}"), Expr::Object(fields) if fields[1].0 == "b c"));
    }

    #[test]
    fn rejects_deep_nesting() {
        let src = format!("{}1{}", "(".repeat(MAX_DEPTH + 1), ")".repeat(MAX_DEPTH + 1));
        assert!(matches!(parse(&src), Err(Error::Parse { .. })));
        let ok = format!("{}1{}", "(".repeat(10), ")".repeat(10));
        assert!(parse(&ok).is_ok());
    }

    #[test]
    fn long_operator_chains_hit_the_depth_limit() {
        let sum = vec!["1"; 1000].join(" + ");
        assert!(matches!(parse(&sum), Err(Error::Parse { .. })));
        let either = vec!["a"; 1000].join(" || ");
        assert!(matches!(parse(&either), Err(Error::Parse { .. })));
        let members = format!("a{}", ".b".repeat(1000));
        assert!(matches!(parse(&members), Err(Error::Parse { .. })));

        let short = vec!["1"; 40].join(" + ");
        assert!(parse(&short).is_ok());
    }

    #[test]
    fn rejects_missing_separator() {
        assert!(matches!(parse("print(1) print(2)"), Err(Error::Parse { .. })));
        assert!(matches!(parse("1 +"), Err(Error::Parse { .. })));
        assert!(matches!(parse("let = 3"), Err(Error::Parse { .. })));
    }
}
