//! Recursive-descent parser producing an [`ast::Query`] from Cypher text.

use crate::ast::*;
use crate::error::{Error, Result};
use crate::lexer::{Keyword, Lexer, Symbol, Token};

pub fn parse(src: &str) -> Result<Query> {
    let tokens = Lexer::new(src).tokenize().map_err(|e| Error::Parse(e.0))?;
    let mut parser = Parser { tokens, pos: 0 };
    let mut query = parser.parse_query()?;
    while parser.match_keyword(Keyword::Union) {
        let all = parser.match_keyword(Keyword::All);
        let rhs = parser.parse_query()?;
        query.clauses.push(Clause::Union(UnionClause { all, rhs: Box::new(rhs) }));
    }
    parser.expect_eof()?;
    Ok(query)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

fn is_aggregate_name(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "count" | "sum" | "avg" | "min" | "max" | "collect" | "stdev" | "stdevp" | "percentiledisc" | "percentilecont"
    )
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn peek_at(&self, n: usize) -> &Token {
        self.tokens.get(self.pos + n).unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek(), Token::Eof)
    }

    fn at_clause_boundary(&self) -> bool {
        matches!(self.peek(), Token::Eof | Token::Keyword(Keyword::Union) | Token::Symbol(Symbol::RBrace))
    }

    fn check_symbol(&self, s: Symbol) -> bool {
        matches!(self.peek(), Token::Symbol(sym) if *sym == s)
    }

    fn match_symbol(&mut self, s: Symbol) -> bool {
        if self.check_symbol(s) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_symbol(&mut self, s: Symbol) -> Result<()> {
        if self.match_symbol(s) {
            Ok(())
        } else {
            Err(Error::Parse(format!("expected {s:?}, found {:?}", self.peek())))
        }
    }

    fn check_keyword(&self, k: Keyword) -> bool {
        matches!(self.peek(), Token::Keyword(kw) if *kw == k)
    }

    fn match_keyword(&mut self, k: Keyword) -> bool {
        if self.check_keyword(k) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, k: Keyword) -> Result<()> {
        if self.match_keyword(k) {
            Ok(())
        } else {
            Err(Error::Parse(format!("expected {k:?}, found {:?}", self.peek())))
        }
    }

    fn expect_ident(&mut self) -> Result<String> {
        match self.advance() {
            Token::Ident(s) => Ok(s),
            other => Err(Error::Parse(format!("expected identifier, found {other:?}"))),
        }
    }

    fn expect_eof(&mut self) -> Result<()> {
        if self.at_eof() {
            Ok(())
        } else {
            Err(Error::Parse(format!("unexpected trailing input: {:?}", self.peek())))
        }
    }

    // --- Query / clauses --------------------------------------------------

    fn parse_query(&mut self) -> Result<Query> {
        let mut clauses = Vec::new();
        while !self.at_clause_boundary() {
            clauses.push(self.parse_clause()?);
        }
        Ok(Query { clauses })
    }

    fn parse_query_until_rbrace(&mut self) -> Result<Query> {
        self.parse_query()
    }

    fn parse_clause(&mut self) -> Result<Clause> {
        match self.peek() {
            Token::Keyword(Keyword::Match) | Token::Keyword(Keyword::Optional) => self.parse_match(),
            Token::Keyword(Keyword::Create) => self.parse_create(),
            Token::Keyword(Keyword::Merge) => self.parse_merge(),
            Token::Keyword(Keyword::Set) => self.parse_set(),
            Token::Keyword(Keyword::Remove) => self.parse_remove(),
            Token::Keyword(Keyword::Delete) | Token::Keyword(Keyword::Detach) => self.parse_delete(),
            Token::Keyword(Keyword::With) => self.parse_with(),
            Token::Keyword(Keyword::Unwind) => self.parse_unwind(),
            Token::Keyword(Keyword::Return) => self.parse_return(),
            Token::Keyword(Keyword::Call) => self.parse_call(),
            other => Err(Error::Parse(format!("unexpected token at start of clause: {other:?}"))),
        }
    }

    fn parse_match(&mut self) -> Result<Clause> {
        let optional = self.match_keyword(Keyword::Optional);
        self.expect_keyword(Keyword::Match)?;
        let mut patterns = vec![self.parse_pattern()?];
        while self.match_symbol(Symbol::Comma) {
            patterns.push(self.parse_pattern()?);
        }
        let where_clause = if self.match_keyword(Keyword::Where) {
            Some(WhereClause { predicate: self.parse_expression()? })
        } else {
            None
        };
        Ok(Clause::Match(MatchClause { optional, patterns, where_clause }))
    }

    fn parse_create(&mut self) -> Result<Clause> {
        self.expect_keyword(Keyword::Create)?;
        let mut patterns = vec![self.parse_pattern()?];
        while self.match_symbol(Symbol::Comma) {
            patterns.push(self.parse_pattern()?);
        }
        for pattern in &patterns {
            for el in &pattern.elements {
                if let PathElement::Node(n) = el {
                    if n.labels.len() > 1 {
                        return Err(Error::Semantic(crate::error::SemanticError::DisjunctiveLabelsInCreate));
                    }
                }
            }
        }
        Ok(Clause::Create(CreateClause { patterns }))
    }

    fn parse_merge(&mut self) -> Result<Clause> {
        self.expect_keyword(Keyword::Merge)?;
        let pattern = self.parse_pattern()?;
        let mut on_create = Vec::new();
        let mut on_match = Vec::new();
        while self.match_keyword(Keyword::On) {
            if self.match_keyword(Keyword::Create) {
                self.expect_keyword(Keyword::Set)?;
                on_create = self.parse_set_items()?;
            } else if self.match_keyword(Keyword::Match) {
                self.expect_keyword(Keyword::Set)?;
                on_match = self.parse_set_items()?;
            } else {
                return Err(Error::Parse("expected CREATE or MATCH after ON".into()));
            }
        }
        Ok(Clause::Merge(MergeClause { pattern, on_create, on_match }))
    }

    fn parse_set(&mut self) -> Result<Clause> {
        self.expect_keyword(Keyword::Set)?;
        let items = self.parse_set_items()?;
        Ok(Clause::Set(SetClause { items }))
    }

    fn parse_set_items(&mut self) -> Result<Vec<SetItem>> {
        let mut items = vec![self.parse_set_item()?];
        while self.match_symbol(Symbol::Comma) {
            items.push(self.parse_set_item()?);
        }
        Ok(items)
    }

    fn parse_set_item(&mut self) -> Result<SetItem> {
        let var = self.expect_ident()?;
        if self.match_symbol(Symbol::Colon) {
            let mut labels = vec![self.expect_ident()?];
            while self.match_symbol(Symbol::Colon) {
                labels.push(self.expect_ident()?);
            }
            return Ok(SetItem::Labels { variable: var, labels });
        }
        if self.match_symbol(Symbol::Dot) {
            let key = self.expect_ident()?;
            self.expect_symbol(Symbol::Eq)?;
            let value = self.parse_expression()?;
            return Ok(SetItem::Property { target: PropertyAccess { base: Expression::Variable(var), key }, value });
        }
        if self.match_symbol(Symbol::PlusEq) {
            let value = self.parse_expression()?;
            return Ok(SetItem::AllProperties { variable: var, value, merge: true });
        }
        self.expect_symbol(Symbol::Eq)?;
        let value = self.parse_expression()?;
        Ok(SetItem::AllProperties { variable: var, value, merge: false })
    }

    fn parse_remove(&mut self) -> Result<Clause> {
        self.expect_keyword(Keyword::Remove)?;
        let mut items = vec![self.parse_remove_item()?];
        while self.match_symbol(Symbol::Comma) {
            items.push(self.parse_remove_item()?);
        }
        Ok(Clause::Remove(RemoveClause { items }))
    }

    fn parse_remove_item(&mut self) -> Result<RemoveItem> {
        let var = self.expect_ident()?;
        if self.match_symbol(Symbol::Colon) {
            let label = self.expect_ident()?;
            return Ok(RemoveItem::Label { variable: var, label });
        }
        self.expect_symbol(Symbol::Dot)?;
        let key = self.expect_ident()?;
        Ok(RemoveItem::Property(PropertyAccess { base: Expression::Variable(var), key }))
    }

    fn parse_delete(&mut self) -> Result<Clause> {
        let detach = self.match_keyword(Keyword::Detach);
        self.expect_keyword(Keyword::Delete)?;
        let mut vars = vec![self.expect_ident()?];
        while self.match_symbol(Symbol::Comma) {
            vars.push(self.expect_ident()?);
        }
        Ok(Clause::Delete(DeleteClause { variables: vars, detach }))
    }

    fn parse_unwind(&mut self) -> Result<Clause> {
        self.expect_keyword(Keyword::Unwind)?;
        let expression = self.parse_expression()?;
        self.expect_keyword(Keyword::As)?;
        let variable = self.expect_ident()?;
        Ok(Clause::Unwind(UnwindClause { expression, variable }))
    }

    fn parse_call(&mut self) -> Result<Clause> {
        self.expect_keyword(Keyword::Call)?;
        self.expect_symbol(Symbol::LBrace)?;
        let query = self.parse_query_until_rbrace()?;
        self.expect_symbol(Symbol::RBrace)?;
        Ok(Clause::Call(CallClause { query: Box::new(query) }))
    }

    fn parse_with(&mut self) -> Result<Clause> {
        self.expect_keyword(Keyword::With)?;
        let distinct = self.match_keyword(Keyword::Distinct);
        let mut items = vec![self.parse_return_item()?];
        while self.match_symbol(Symbol::Comma) {
            items.push(self.parse_return_item()?);
        }
        let order_by = if self.check_keyword(Keyword::OrderBy) { Some(self.parse_order_by()?) } else { None };
        let skip = if self.match_keyword(Keyword::Skip) { Some(self.parse_expression()?) } else { None };
        let limit = if self.match_keyword(Keyword::Limit) { Some(self.parse_expression()?) } else { None };
        let where_clause = if self.match_keyword(Keyword::Where) {
            Some(WhereClause { predicate: self.parse_expression()? })
        } else {
            None
        };
        Ok(Clause::With(WithClause { items, distinct, order_by, skip, limit, where_clause }))
    }

    fn parse_return(&mut self) -> Result<Clause> {
        self.expect_keyword(Keyword::Return)?;
        let distinct = self.match_keyword(Keyword::Distinct);
        let mut items = vec![self.parse_return_item()?];
        while self.match_symbol(Symbol::Comma) {
            items.push(self.parse_return_item()?);
        }
        let order_by = if self.check_keyword(Keyword::OrderBy) { Some(self.parse_order_by()?) } else { None };
        let skip = if self.match_keyword(Keyword::Skip) { Some(self.parse_expression()?) } else { None };
        let limit = if self.match_keyword(Keyword::Limit) { Some(self.parse_expression()?) } else { None };
        Ok(Clause::Return(ReturnClause { items, distinct, order_by, skip, limit }))
    }

    fn parse_return_item(&mut self) -> Result<ReturnItem> {
        if self.match_symbol(Symbol::Star) {
            return Ok(ReturnItem { expression: Expression::Variable("*".to_string()), alias: None });
        }
        let expression = self.parse_expression()?;
        let alias = if self.match_keyword(Keyword::As) { Some(self.expect_ident()?) } else { None };
        Ok(ReturnItem { expression, alias })
    }

    fn parse_order_by(&mut self) -> Result<OrderByClause> {
        self.expect_keyword(Keyword::OrderBy)?;
        self.expect_keyword(Keyword::By)?;
        let mut items = vec![self.parse_order_item()?];
        while self.match_symbol(Symbol::Comma) {
            items.push(self.parse_order_item()?);
        }
        Ok(OrderByClause { items })
    }

    fn parse_order_item(&mut self) -> Result<OrderByItem> {
        let expression = self.parse_expression()?;
        let direction = if self.match_keyword(Keyword::Desc) {
            Direction::Descending
        } else {
            self.match_keyword(Keyword::Asc);
            Direction::Ascending
        };
        Ok(OrderByItem { expression, direction })
    }

    // --- Patterns -----------------------------------------------------------

    fn parse_pattern(&mut self) -> Result<Pattern> {
        let mut path_variable = None;
        if let Token::Ident(name) = self.peek().clone() {
            if matches!(self.peek_at(1), Token::Symbol(Symbol::Eq)) {
                path_variable = Some(name);
                self.advance();
                self.advance();
            }
        }
        let mut elements = vec![PathElement::Node(self.parse_node_pattern()?)];
        while self.check_symbol(Symbol::Dash) || self.check_symbol(Symbol::BackArrow) {
            elements.push(PathElement::Relationship(self.parse_relationship()?));
            elements.push(PathElement::Node(self.parse_node_pattern()?));
        }
        Ok(Pattern { path_variable, elements })
    }

    fn parse_node_pattern(&mut self) -> Result<NodePattern> {
        self.expect_symbol(Symbol::LParen)?;
        let variable = if let Token::Ident(name) = self.peek().clone() {
            self.advance();
            Some(name)
        } else {
            None
        };
        let mut labels = Vec::new();
        if self.match_symbol(Symbol::Colon) {
            loop {
                labels.push(self.expect_ident()?);
                if !self.match_symbol(Symbol::Pipe) {
                    break;
                }
            }
        }
        let properties = if self.check_symbol(Symbol::LBrace) { Some(self.parse_property_map()?) } else { None };
        self.expect_symbol(Symbol::RParen)?;
        Ok(NodePattern { variable, labels, properties })
    }

    fn parse_relationship(&mut self) -> Result<RelationshipPattern> {
        let left_in = self.match_symbol(Symbol::BackArrow);
        if !left_in {
            self.expect_symbol(Symbol::Dash)?;
        }
        let mut variable = None;
        let mut types = Vec::new();
        let mut properties = None;
        let mut length = None;
        if self.match_symbol(Symbol::LBracket) {
            if let Token::Ident(name) = self.peek().clone() {
                self.advance();
                variable = Some(name);
            }
            if self.match_symbol(Symbol::Colon) {
                loop {
                    types.push(self.expect_ident()?);
                    if !self.match_symbol(Symbol::Pipe) {
                        break;
                    }
                }
            }
            if self.match_symbol(Symbol::Star) {
                length = Some(self.parse_variable_length()?);
            }
            if self.check_symbol(Symbol::LBrace) {
                properties = Some(self.parse_property_map()?);
            }
            self.expect_symbol(Symbol::RBracket)?;
        }
        let right_out = self.match_symbol(Symbol::Arrow);
        if !right_out && !self.match_symbol(Symbol::Dash) {
            return Err(Error::Parse("expected '-' or '->' to close relationship pattern".into()));
        }
        let direction = match (left_in, right_out) {
            (true, false) => RelationshipDirection::In,
            (false, true) => RelationshipDirection::Out,
            (false, false) => RelationshipDirection::Undirected,
            (true, true) => return Err(Error::Parse("relationship cannot point both ways".into())),
        };
        Ok(RelationshipPattern { variable, types, direction, properties, length })
    }

    fn parse_variable_length(&mut self) -> Result<VariableLength> {
        let mut min = None;
        let mut max = None;
        if let Token::Int(i) = self.peek().clone() {
            self.advance();
            min = Some(i as u32);
        }
        if self.match_symbol(Symbol::DotDot) {
            if let Token::Int(i) = self.peek().clone() {
                self.advance();
                max = Some(i as u32);
            }
        } else if min.is_some() {
            max = min;
        }
        Ok(VariableLength { min, max })
    }

    fn parse_property_map(&mut self) -> Result<PropertyMap> {
        self.expect_symbol(Symbol::LBrace)?;
        let mut pairs = Vec::new();
        if !self.check_symbol(Symbol::RBrace) {
            loop {
                let key = self.expect_ident()?;
                self.expect_symbol(Symbol::Colon)?;
                let value = self.parse_expression()?;
                pairs.push(PropertyPair { key, value });
                if !self.match_symbol(Symbol::Comma) {
                    break;
                }
            }
        }
        self.expect_symbol(Symbol::RBrace)?;
        Ok(PropertyMap { pairs })
    }

    // --- Expressions ----------------------------------------------------------

    fn parse_expression(&mut self) -> Result<Expression> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expression> {
        let mut left = self.parse_xor()?;
        while self.match_keyword(Keyword::Or) {
            let right = self.parse_xor()?;
            left = bin(BinaryOperator::Or, left, right);
        }
        Ok(left)
    }

    fn parse_xor(&mut self) -> Result<Expression> {
        let mut left = self.parse_and()?;
        while self.match_keyword(Keyword::Xor) {
            let right = self.parse_and()?;
            left = bin(BinaryOperator::Xor, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expression> {
        let mut left = self.parse_not()?;
        while self.match_keyword(Keyword::And) {
            let right = self.parse_not()?;
            left = bin(BinaryOperator::And, left, right);
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expression> {
        if self.match_keyword(Keyword::Not) {
            let operand = self.parse_not()?;
            return Ok(Expression::Unary(Box::new(UnaryExpression { op: UnaryOperator::Not, operand })));
        }
        self.parse_comparison()
    }

    fn match_comparison_op(&mut self) -> Option<BinaryOperator> {
        let op = match self.peek() {
            Token::Symbol(Symbol::Eq) => BinaryOperator::Eq,
            Token::Symbol(Symbol::Ne) => BinaryOperator::Ne,
            Token::Symbol(Symbol::Lt) => BinaryOperator::Lt,
            Token::Symbol(Symbol::Gt) => BinaryOperator::Gt,
            Token::Symbol(Symbol::Le) => BinaryOperator::Le,
            Token::Symbol(Symbol::Ge) => BinaryOperator::Ge,
            _ => return None,
        };
        self.advance();
        Some(op)
    }

    fn parse_comparison(&mut self) -> Result<Expression> {
        let left = self.parse_additive()?;
        if let Some(op) = self.match_comparison_op() {
            let right = self.parse_additive()?;
            return Ok(bin(op, left, right));
        }
        if self.match_keyword(Keyword::In) {
            let right = self.parse_additive()?;
            return Ok(Expression::In { item: Box::new(left), list: Box::new(right) });
        }
        if self.match_keyword(Keyword::StartsWith) {
            self.expect_keyword(Keyword::With)?;
            let right = self.parse_additive()?;
            return Ok(bin(BinaryOperator::StartsWith, left, right));
        }
        if self.match_keyword(Keyword::EndsWith) {
            self.expect_keyword(Keyword::With)?;
            let right = self.parse_additive()?;
            return Ok(bin(BinaryOperator::EndsWith, left, right));
        }
        if self.match_keyword(Keyword::Contains) {
            let right = self.parse_additive()?;
            return Ok(bin(BinaryOperator::Contains, left, right));
        }
        if self.match_keyword(Keyword::Is) {
            let not = self.match_keyword(Keyword::Not);
            self.expect_keyword(Keyword::Null)?;
            let op = if not { UnaryOperator::IsNotNull } else { UnaryOperator::IsNull };
            return Ok(Expression::Unary(Box::new(UnaryExpression { op, operand: left })));
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expression> {
        let mut left = self.parse_multiplicative()?;
        loop {
            if self.match_symbol(Symbol::Plus) {
                let right = self.parse_multiplicative()?;
                left = bin(BinaryOperator::Add, left, right);
            } else if self.match_symbol(Symbol::Dash) {
                let right = self.parse_multiplicative()?;
                left = bin(BinaryOperator::Sub, left, right);
            } else {
                break;
            }
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expression> {
        let mut left = self.parse_power()?;
        loop {
            if self.match_symbol(Symbol::Star) {
                let right = self.parse_power()?;
                left = bin(BinaryOperator::Mul, left, right);
            } else if self.match_symbol(Symbol::Slash) {
                let right = self.parse_power()?;
                left = bin(BinaryOperator::Div, left, right);
            } else if self.match_symbol(Symbol::Percent) {
                let right = self.parse_power()?;
                left = bin(BinaryOperator::Mod, left, right);
            } else {
                break;
            }
        }
        Ok(left)
    }

    fn parse_power(&mut self) -> Result<Expression> {
        let left = self.parse_unary()?;
        if self.match_symbol(Symbol::Caret) {
            let right = self.parse_power()?;
            return Ok(bin(BinaryOperator::Pow, left, right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expression> {
        if self.match_symbol(Symbol::Dash) {
            let operand = self.parse_unary()?;
            return Ok(Expression::Unary(Box::new(UnaryExpression { op: UnaryOperator::Neg, operand })));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expression> {
        let mut expr = self.parse_atom()?;
        loop {
            if self.match_symbol(Symbol::Dot) {
                let key = self.expect_ident()?;
                expr = Expression::Property(Box::new(PropertyAccess { base: expr, key }));
            } else if self.match_symbol(Symbol::LBracket) {
                if self.match_symbol(Symbol::DotDot) {
                    let end = if self.check_symbol(Symbol::RBracket) { None } else { Some(Box::new(self.parse_expression()?)) };
                    self.expect_symbol(Symbol::RBracket)?;
                    expr = Expression::Slice { base: Box::new(expr), start: None, end };
                } else {
                    let first = self.parse_expression()?;
                    if self.match_symbol(Symbol::DotDot) {
                        let end = if self.check_symbol(Symbol::RBracket) { None } else { Some(Box::new(self.parse_expression()?)) };
                        self.expect_symbol(Symbol::RBracket)?;
                        expr = Expression::Slice { base: Box::new(expr), start: Some(Box::new(first)), end };
                    } else {
                        self.expect_symbol(Symbol::RBracket)?;
                        expr = Expression::Subscript { base: Box::new(expr), index: Box::new(first) };
                    }
                }
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_atom(&mut self) -> Result<Expression> {
        match self.peek().clone() {
            Token::Int(i) => {
                self.advance();
                Ok(Expression::Literal(Literal::Int(i)))
            }
            Token::Float(f) => {
                self.advance();
                Ok(Expression::Literal(Literal::Float(f)))
            }
            Token::Str(s) => {
                self.advance();
                Ok(Expression::Literal(Literal::Str(s)))
            }
            Token::Parameter(p) => {
                self.advance();
                Ok(Expression::Parameter(p))
            }
            Token::Keyword(Keyword::True) => {
                self.advance();
                Ok(Expression::Literal(Literal::Bool(true)))
            }
            Token::Keyword(Keyword::False) => {
                self.advance();
                Ok(Expression::Literal(Literal::Bool(false)))
            }
            Token::Keyword(Keyword::Null) => {
                self.advance();
                Ok(Expression::Literal(Literal::Null))
            }
            Token::Symbol(Symbol::LParen) => {
                self.advance();
                let e = self.parse_expression()?;
                self.expect_symbol(Symbol::RParen)?;
                Ok(e)
            }
            Token::Symbol(Symbol::LBracket) => self.parse_bracket(),
            Token::Symbol(Symbol::LBrace) => self.parse_map_literal(),
            Token::Keyword(Keyword::Case) => self.parse_case(),
            Token::Keyword(Keyword::Exists) => self.parse_exists(),
            Token::Keyword(Keyword::Count) => self.parse_count_keyword(),
            Token::Keyword(Keyword::All) => self.parse_quantifier(QuantifierKind::All),
            Token::Keyword(Keyword::Any) => self.parse_quantifier(QuantifierKind::Any),
            Token::Keyword(Keyword::None) => self.parse_quantifier(QuantifierKind::None),
            Token::Keyword(Keyword::Single) => self.parse_quantifier(QuantifierKind::Single),
            Token::Ident(name) => {
                self.advance();
                if self.check_symbol(Symbol::LParen) {
                    self.advance();
                    if name.eq_ignore_ascii_case("count") && self.check_symbol(Symbol::Star) {
                        self.advance();
                        self.expect_symbol(Symbol::RParen)?;
                        return Ok(Expression::Aggregate(AggregateFunction {
                            name: "count".into(),
                            distinct: false,
                            arg: None,
                            extra_args: vec![],
                        }));
                    }
                    let distinct = self.match_keyword(Keyword::Distinct);
                    let mut args = Vec::new();
                    if !self.check_symbol(Symbol::RParen) {
                        args.push(self.parse_expression()?);
                        while self.match_symbol(Symbol::Comma) {
                            args.push(self.parse_expression()?);
                        }
                    }
                    self.expect_symbol(Symbol::RParen)?;
                    if is_aggregate_name(&name) {
                        let mut it = args.into_iter();
                        let arg = it.next().map(Box::new);
                        let extra_args: Vec<_> = it.collect();
                        return Ok(Expression::Aggregate(AggregateFunction { name, distinct, arg, extra_args }));
                    }
                    if distinct {
                        return Err(Error::Parse(format!("DISTINCT is not valid for function {name}")));
                    }
                    return Ok(Expression::FunctionCall(FunctionCall { name, args }));
                }
                Ok(Expression::Variable(name))
            }
            other => Err(Error::Parse(format!("unexpected token in expression: {other:?}"))),
        }
    }

    fn parse_bracket(&mut self) -> Result<Expression> {
        self.advance();
        if self.match_symbol(Symbol::RBracket) {
            return Ok(Expression::ListLiteral(vec![]));
        }
        if let Token::Ident(name) = self.peek().clone() {
            if matches!(self.peek_at(1), Token::Keyword(Keyword::In)) {
                self.advance();
                self.advance();
                let list = self.parse_expression()?;
                let predicate = if self.match_keyword(Keyword::Where) { Some(self.parse_expression()?) } else { None };
                let projection = if self.match_symbol(Symbol::Pipe) { Some(self.parse_expression()?) } else { None };
                self.expect_symbol(Symbol::RBracket)?;
                return Ok(Expression::ListComprehension(Box::new(ListComprehension {
                    variable: name,
                    list,
                    predicate,
                    projection,
                })));
            }
        }
        let mut items = vec![self.parse_expression()?];
        while self.match_symbol(Symbol::Comma) {
            items.push(self.parse_expression()?);
        }
        self.expect_symbol(Symbol::RBracket)?;
        Ok(Expression::ListLiteral(items))
    }

    fn parse_map_literal(&mut self) -> Result<Expression> {
        self.advance();
        let mut pairs = Vec::new();
        if !self.check_symbol(Symbol::RBrace) {
            loop {
                let key = self.expect_ident()?;
                self.expect_symbol(Symbol::Colon)?;
                let value = self.parse_expression()?;
                pairs.push((key, value));
                if !self.match_symbol(Symbol::Comma) {
                    break;
                }
            }
        }
        self.expect_symbol(Symbol::RBrace)?;
        Ok(Expression::MapLiteral(pairs))
    }

    fn parse_case(&mut self) -> Result<Expression> {
        self.advance();
        let subject = if !self.check_keyword(Keyword::When) { Some(self.parse_expression()?) } else { None };
        let mut whens = Vec::new();
        while self.match_keyword(Keyword::When) {
            let cond = self.parse_expression()?;
            self.expect_keyword(Keyword::Then)?;
            let result = self.parse_expression()?;
            whens.push((cond, result));
        }
        let else_ = if self.match_keyword(Keyword::Else) { Some(self.parse_expression()?) } else { None };
        self.expect_keyword(Keyword::End)?;
        Ok(Expression::Case(Box::new(CaseExpression { subject, whens, else_ })))
    }

    fn parse_exists(&mut self) -> Result<Expression> {
        self.advance();
        if self.match_symbol(Symbol::LBrace) {
            let query = self.parse_query_until_rbrace()?;
            self.expect_symbol(Symbol::RBrace)?;
            return Ok(Expression::Exists(Box::new(ExistsExpression { query: Some(Box::new(query)), expression: None })));
        }
        self.expect_symbol(Symbol::LParen)?;
        let expr = self.parse_expression()?;
        self.expect_symbol(Symbol::RParen)?;
        Ok(Expression::Exists(Box::new(ExistsExpression { query: None, expression: Some(expr) })))
    }

    fn parse_count_keyword(&mut self) -> Result<Expression> {
        self.advance();
        if self.match_symbol(Symbol::LBrace) {
            let query = self.parse_query_until_rbrace()?;
            self.expect_symbol(Symbol::RBrace)?;
            return Ok(Expression::CountSubquery(Box::new(query)));
        }
        self.expect_symbol(Symbol::LParen)?;
        if self.match_symbol(Symbol::Star) {
            self.expect_symbol(Symbol::RParen)?;
            return Ok(Expression::Aggregate(AggregateFunction { name: "count".into(), distinct: false, arg: None, extra_args: vec![] }));
        }
        let distinct = self.match_keyword(Keyword::Distinct);
        let arg = self.parse_expression()?;
        self.expect_symbol(Symbol::RParen)?;
        Ok(Expression::Aggregate(AggregateFunction { name: "count".into(), distinct, arg: Some(Box::new(arg)), extra_args: vec![] }))
    }

    fn parse_quantifier(&mut self, kind: QuantifierKind) -> Result<Expression> {
        self.advance();
        self.expect_symbol(Symbol::LParen)?;
        let variable = self.expect_ident()?;
        self.expect_keyword(Keyword::In)?;
        let list = self.parse_expression()?;
        self.expect_keyword(Keyword::Where)?;
        let predicate = self.parse_expression()?;
        self.expect_symbol(Symbol::RParen)?;
        Ok(Expression::Quantifier(Box::new(QuantifierExpression { kind, variable, list, predicate })))
    }
}

fn bin(op: BinaryOperator, left: Expression, right: Expression) -> Expression {
    Expression::Binary(Box::new(BinaryExpression { op, left, right }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_match_return() {
        let q = parse("MATCH (n:Person) WHERE n.age > 30 RETURN n.name AS name").unwrap();
        assert_eq!(q.clauses.len(), 2);
        assert!(matches!(q.clauses[0], Clause::Match(_)));
        assert!(matches!(q.clauses[1], Clause::Return(_)));
    }

    #[test]
    fn parses_relationship_pattern_with_direction() {
        let q = parse("MATCH (a)-[r:KNOWS]->(b) RETURN r").unwrap();
        if let Clause::Match(m) = &q.clauses[0] {
            let pattern = &m.patterns[0];
            assert_eq!(pattern.elements.len(), 3);
            if let PathElement::Relationship(rel) = &pattern.elements[1] {
                assert_eq!(rel.direction, RelationshipDirection::Out);
                assert_eq!(rel.types, vec!["KNOWS".to_string()]);
            } else {
                panic!("expected relationship element");
            }
        } else {
            panic!("expected match clause");
        }
    }

    #[test]
    fn parses_variable_length_path() {
        let q = parse("MATCH (a)-[:KNOWS*1..3]->(b) RETURN b").unwrap();
        if let Clause::Match(m) = &q.clauses[0] {
            if let PathElement::Relationship(rel) = &m.patterns[0].elements[1] {
                let len = rel.length.as_ref().unwrap();
                assert_eq!(len.min, Some(1));
                assert_eq!(len.max, Some(3));
            } else {
                panic!("expected relationship");
            }
        }
    }

    #[test]
    fn parses_create_merge_set_delete() {
        parse("CREATE (n:Person {name: 'Ada'}) RETURN n").unwrap();
        parse("MERGE (n:Person {name: 'Ada'}) ON CREATE SET n.created = true RETURN n").unwrap();
        parse("MATCH (n) SET n.age = n.age + 1 RETURN n").unwrap();
        parse("MATCH (n) DETACH DELETE n").unwrap();
    }

    #[test]
    fn parses_with_aggregation_and_order_by() {
        parse("MATCH (n) WITH n.label AS label, count(*) AS c ORDER BY c DESC LIMIT 5 RETURN label, c").unwrap();
    }

    #[test]
    fn parses_case_and_list_comprehension() {
        parse("RETURN CASE WHEN 1 = 1 THEN 'a' ELSE 'b' END AS x").unwrap();
        parse("RETURN [x IN [1,2,3] WHERE x > 1 | x * 2] AS ys").unwrap();
    }

    #[test]
    fn parses_exists_and_count_subqueries() {
        parse("MATCH (n) WHERE EXISTS { MATCH (n)-[:KNOWS]->(m) } RETURN n").unwrap();
        parse("MATCH (n) RETURN n, COUNT { MATCH (n)-[:KNOWS]->(m) } AS friends").unwrap();
    }

    #[test]
    fn rejects_disjunctive_labels_in_create() {
        let err = parse("CREATE (n:A|B) RETURN n");
        assert!(err.is_err());
    }
}
