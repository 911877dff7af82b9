//! Statement segmentation and trigger DDL rewriting.
//!
//! The parser grammar carries no SQLite trigger productions, so trigger
//! statements are handled at the token level: the input is tokenized
//! once, split into statements (a trigger's `BEGIN ... END` body keeps
//! its inner semicolons), and for each trigger the header identifiers
//! are rewritten in place while the WHEN clause and the body statements
//! go back through the ordinary expression and statement rewrites with
//! the implicit `NEW`/`OLD` row references exempted.

use crate::{visit, RewriteError, TableNamespace};
use sqlparser::dialect::SQLiteDialect;
use sqlparser::keywords::Keyword;
use sqlparser::parser::{Parser, ParserError};
use sqlparser::tokenizer::{Token, Tokenizer};

pub(crate) enum Segment {
    Plain(Vec<Token>),
    CreateTrigger(Vec<Token>),
    DropTrigger(Vec<Token>),
}

/// Splits `sql` into one token run per statement, keeping trigger bodies
/// intact.
pub(crate) fn split(sql: &str) -> Result<Vec<Segment>, RewriteError> {
    let dialect = SQLiteDialect {};
    let tokens = Tokenizer::new(&dialect, sql).tokenize()?;

    let mut segments = Vec::new();
    let mut pos = 0;
    while pos < tokens.len() {
        match &tokens[pos] {
            Token::Whitespace(_) | Token::SemiColon | Token::EOF => {
                pos += 1;
                continue;
            }
            _ => {}
        }
        if is_create_trigger(&tokens[pos..]) {
            let end = trigger_end(&tokens, pos)?;
            segments.push(Segment::CreateTrigger(tokens[pos..end].to_vec()));
            pos = end;
        } else if is_drop_trigger(&tokens[pos..]) {
            let end = statement_end(&tokens, pos);
            segments.push(Segment::DropTrigger(tokens[pos..end].to_vec()));
            pos = end;
        } else {
            let end = statement_end(&tokens, pos);
            segments.push(Segment::Plain(tokens[pos..end].to_vec()));
            pos = end;
        }
    }
    Ok(segments)
}

/// Rewrites a CREATE TRIGGER statement: trigger name, target table,
/// WHEN clause, and every statement in the body.
pub(crate) fn rewrite_create(
    tokens: &[Token],
    ns: &TableNamespace,
) -> Result<String, RewriteError> {
    let begin = tokens
        .iter()
        .position(|t| keyword_of(t) == Some(Keyword::BEGIN))
        .ok_or_else(|| ParserError::ParserError("CREATE TRIGGER without BEGIN".into()))?;

    // The trigger's own WHEN, as opposed to a WHEN inside a CASE
    // expression in the clause itself.
    let mut when = None;
    let mut case_depth = 0usize;
    for (i, token) in tokens[..begin].iter().enumerate() {
        match keyword_of(token) {
            Some(Keyword::CASE) => case_depth += 1,
            Some(Keyword::END) => case_depth = case_depth.saturating_sub(1),
            Some(Keyword::WHEN) if case_depth == 0 => {
                when = Some(i);
                break;
            }
            _ => {}
        }
    }

    let header = &tokens[..when.unwrap_or(begin)];
    let mut out = render_marked(header, &header_rewrites(header), ns);
    let trimmed = out.trim_end().len();
    out.truncate(trimmed);
    out.push(' ');

    if let Some(when) = when {
        let condition = render(&tokens[when + 1..begin]);
        let mut expr = Parser::new(&SQLiteDialect {})
            .try_with_sql(&condition)?
            .parse_expr()?;
        visit::rewrite_trigger_condition(&mut expr, ns);
        out.push_str("WHEN ");
        out.push_str(&expr.to_string());
        out.push(' ');
    }

    // `split` guaranteed the final token is the body's closing END.
    let body = render(&tokens[begin + 1..tokens.len() - 1]);
    out.push_str("BEGIN ");
    let mut statements = Parser::parse_sql(&SQLiteDialect {}, &body)?;
    for stmt in &mut statements {
        visit::rewrite_body_statement(stmt, ns);
        out.push_str(&stmt.to_string());
        out.push_str("; ");
    }
    out.push_str("END");
    Ok(out)
}

/// Rewrites a DROP TRIGGER statement's trigger name.
pub(crate) fn rewrite_drop(tokens: &[Token], ns: &TableNamespace) -> String {
    render_marked(tokens, &header_rewrites(tokens), ns)
}

fn keyword_of(token: &Token) -> Option<Keyword> {
    match token {
        Token::Word(word) => Some(word.keyword),
        _ => None,
    }
}

fn leading_keywords(tokens: &[Token], n: usize) -> Vec<Keyword> {
    tokens.iter().filter_map(keyword_of).take(n).collect()
}

fn is_create_trigger(tokens: &[Token]) -> bool {
    matches!(
        leading_keywords(tokens, 3).as_slice(),
        [Keyword::CREATE, Keyword::TRIGGER, ..]
            | [Keyword::CREATE, Keyword::TEMP | Keyword::TEMPORARY, Keyword::TRIGGER]
    )
}

fn is_drop_trigger(tokens: &[Token]) -> bool {
    matches!(
        leading_keywords(tokens, 2).as_slice(),
        [Keyword::DROP, Keyword::TRIGGER]
    )
}

fn statement_end(tokens: &[Token], mut pos: usize) -> usize {
    while pos < tokens.len() && tokens[pos] != Token::SemiColon {
        pos += 1;
    }
    pos
}

/// End (exclusive) of a CREATE TRIGGER statement: the END closing the
/// body's BEGIN, tracking CASE nesting on the way.
fn trigger_end(tokens: &[Token], mut pos: usize) -> Result<usize, RewriteError> {
    let mut openers: Vec<Keyword> = Vec::new();
    while pos < tokens.len() {
        match keyword_of(&tokens[pos]) {
            Some(kw @ (Keyword::BEGIN | Keyword::CASE)) => openers.push(kw),
            Some(Keyword::END) => match openers.pop() {
                Some(Keyword::BEGIN) if openers.is_empty() => return Ok(pos + 1),
                Some(_) => {}
                None => break,
            },
            _ => {}
        }
        pos += 1;
    }
    Err(ParserError::ParserError("unterminated CREATE TRIGGER".into()).into())
}

/// Token indexes whose identifier gets the namespace applied: the last
/// segment of the dotted name after TRIGGER (skipping IF NOT EXISTS)
/// and after ON.
fn header_rewrites(tokens: &[Token]) -> Vec<usize> {
    let mut marks = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        let keyword = match keyword_of(&tokens[i]) {
            Some(kw) => kw,
            None => {
                i += 1;
                continue;
            }
        };
        if matches!(keyword, Keyword::TRIGGER | Keyword::ON) {
            let mut j = i + 1;
            while j < tokens.len() {
                match &tokens[j] {
                    Token::Whitespace(_) => j += 1,
                    Token::Word(word)
                        if matches!(
                            word.keyword,
                            Keyword::IF | Keyword::NOT | Keyword::EXISTS
                        ) =>
                    {
                        j += 1
                    }
                    _ => break,
                }
            }
            if let Some(last) = name_chain_last(tokens, j) {
                marks.push(last);
                i = last + 1;
                continue;
            }
        }
        i += 1;
    }
    marks
}

fn name_chain_last(tokens: &[Token], start: usize) -> Option<usize> {
    let mut last = match tokens.get(start) {
        Some(Token::Word(_)) => start,
        _ => return None,
    };
    let mut i = start + 1;
    while matches!(tokens.get(i), Some(Token::Period)) {
        match tokens.get(i + 1) {
            Some(Token::Word(_)) => {
                last = i + 1;
                i += 2;
            }
            _ => break,
        }
    }
    Some(last)
}

fn render(tokens: &[Token]) -> String {
    tokens.iter().map(|t| t.to_string()).collect()
}

fn render_marked(tokens: &[Token], marks: &[usize], ns: &TableNamespace) -> String {
    let mut out = String::new();
    for (i, token) in tokens.iter().enumerate() {
        if marks.contains(&i) {
            if let Token::Word(word) = token {
                let mut word = word.clone();
                word.value = ns.apply(&word.value);
                out.push_str(&Token::Word(word).to_string());
                continue;
            }
        }
        out.push_str(&token.to_string());
    }
    out
}
