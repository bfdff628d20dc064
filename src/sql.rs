use std::ops::ControlFlow;

use chrono::NaiveDate;
use sqlparser::ast::{
    self, AssignmentTarget, BinaryOperator, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan, visit_expressions, visit_expressions_mut,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::engine::{ManualEventUpdate, NewManualEvent, NewReservation, NewUser, UserUpdate};
use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    InsertFacility {
        name: String,
        returning: bool,
    },
    RenameFacility {
        code: String,
        name: String,
    },
    DeleteFacility {
        code: String,
    },
    SelectFacilities,
    InsertUser {
        user: NewUser,
        returning: bool,
    },
    /// `INSERT INTO users` with an explicit `id`: the password is stored as a legacy credential.
    ImportUser {
        id: String,
        user: NewUser,
        returning: bool,
    },
    UpdateUser {
        id: String,
        update: UserUpdate,
    },
    DeleteUser {
        id: String,
    },
    SelectUsers(UserFilter),
    InsertReservation {
        reservation: NewReservation,
        returning: bool,
    },
    SetReservationStatus {
        id: String,
        status: ReservationStatus,
    },
    SelectReservations(ReservationFilter),
    InsertManualEvents {
        events: Vec<NewManualEvent>,
        returning: bool,
    },
    DuplicateManualEvent {
        id: Ulid,
        date: NaiveDate,
        returning: bool,
    },
    UpdateManualEvent {
        id: Ulid,
        update: ManualEventUpdate,
    },
    DeleteManualEvent {
        id: Ulid,
    },
    SelectManualEvents {
        facility: Option<String>,
        date: Option<NaiveDate>,
    },
    SelectActivityLogs {
        user_id: Option<String>,
        limit: Option<usize>,
        offset: usize,
    },
    SelectCalendar {
        from: NaiveDate,
        to: NaiveDate,
        facility: Option<String>,
    },
    SelectConflicts {
        facility: String,
        date: NaiveDate,
        start: Option<WallTime>,
        end: Option<WallTime>,
    },
    SelectSession {
        email: String,
        password: String,
    },
    Listen {
        channel: String,
    },
    Unlisten {
        channel: String,
    },
    UnlistenAll,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum SqlError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty query")]
    Empty,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("{table}: unknown column {column}")]
    UnknownColumn { table: &'static str, column: String },
    #[error("{table}: missing column {column}")]
    MissingColumn { table: &'static str, column: &'static str },
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
    #[error("invalid value for {column}: {reason}")]
    InvalidValue { column: String, reason: String },
}

const TABLES: &[&str] = &[
    "facilities",
    "users",
    "reservations",
    "manual_events",
    "activity_logs",
    "calendar",
    "conflicts",
    "sessions",
];

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = trim_statement(sql)?;
    if let Some(cmd) = parse_listen(trimmed) {
        return Ok(cmd);
    }
    dispatch(&parse_statement(trimmed)?)
}

/// Like [`parse_sql`], with `$n` placeholders bound to `params` (`None` is NULL).
/// Values replace placeholder nodes in the parsed tree, so their text is never read as SQL.
pub fn parse_bound(sql: &str, params: &[Option<String>]) -> Result<Command, SqlError> {
    let trimmed = trim_statement(sql)?;
    if let Some(cmd) = parse_listen(trimmed) {
        return Ok(cmd);
    }
    let mut stmt = parse_statement(trimmed)?;
    let bound = visit_expressions_mut(&mut stmt, |expr| {
        if let Expr::Value(ValueWithSpan { value, .. }) = expr {
            let replacement = match &*value {
                Value::Placeholder(p) => bind(p, params),
                _ => return ControlFlow::Continue(()),
            };
            match replacement {
                Ok(v) => *value = v,
                Err(e) => return ControlFlow::Break(e),
            }
        }
        ControlFlow::Continue(())
    });
    if let ControlFlow::Break(e) = bound {
        return Err(e);
    }
    dispatch(&stmt)
}

fn bind(placeholder: &str, params: &[Option<String>]) -> Result<Value, SqlError> {
    let index = placeholder
        .strip_prefix('$')
        .and_then(|n| n.parse::<usize>().ok())
        .filter(|n| *n >= 1)
        .ok_or_else(|| SqlError::Parse(format!("unsupported placeholder {placeholder}")))?;
    match params.get(index - 1) {
        Some(Some(text)) => Ok(Value::SingleQuotedString(text.clone())),
        Some(None) => Ok(Value::Null),
        None => Err(SqlError::Parse(format!("unbound parameter {placeholder}"))),
    }
}

/// Highest `$n` placeholder in the statement, 0 when it has none or does not parse.
pub fn placeholder_count(sql: &str) -> usize {
    let Ok(trimmed) = trim_statement(sql) else { return 0 };
    let Ok(stmt) = parse_statement(trimmed) else { return 0 };
    let mut max = 0;
    let _ = visit_expressions(&stmt, |expr| {
        if let Expr::Value(ValueWithSpan {
            value: Value::Placeholder(p),
            ..
        }) = expr
        {
            if let Some(n) = p.strip_prefix('$').and_then(|n| n.parse::<usize>().ok()) {
                max = max.max(n);
            }
        }
        ControlFlow::<()>::Continue(())
    });
    max
}

fn trim_statement(sql: &str) -> Result<&str, SqlError> {
    let trimmed = sql.trim().trim_end_matches(';').trim();
    if trimmed.is_empty() {
        return Err(SqlError::Empty);
    }
    Ok(trimmed)
}

fn parse_statement(sql: &str) -> Result<Statement, SqlError> {
    let dialect = PostgreSqlDialect {};
    let mut stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    match stmts.len() {
        0 => Err(SqlError::Empty),
        1 => Ok(stmts.remove(0)),
        _ => Err(SqlError::Unsupported("multiple statements".into())),
    }
}

fn dispatch(stmt: &Statement) -> Result<Command, SqlError> {
    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection.as_ref()),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Where a statement's result rows come from, if it returns any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultSource {
    pub table: &'static str,
    /// `INSERT … RETURNING` rather than a `SELECT`.
    pub returning: bool,
}

/// Works on unbound statements (`$1` placeholders), for describing result columns.
pub fn result_source(sql: &str) -> Option<ResultSource> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql.trim().trim_end_matches(';')).ok()?;
    match stmts.first()? {
        Statement::Query(query) => match query.body.as_ref() {
            SetExpr::Select(select) => Some(ResultSource {
                table: table(&table_factor_name(&select.from.first()?.relation).ok()?).ok()?,
                returning: false,
            }),
            _ => None,
        },
        Statement::Insert(insert) if insert.returning.is_some() => match &insert.table {
            TableObject::TableName(name) => Some(ResultSource {
                table: table(&object_name_last(name).ok()?).ok()?,
                returning: true,
            }),
            _ => None,
        },
        _ => None,
    }
}

fn parse_listen(sql: &str) -> Option<Command> {
    let (keyword, rest) = sql.split_once(char::is_whitespace).unwrap_or((sql, ""));
    let channel = rest.trim().to_string();
    match keyword.to_ascii_uppercase().as_str() {
        "LISTEN" => Some(Command::Listen { channel }),
        "UNLISTEN" if channel == "*" => Some(Command::UnlistenAll),
        "UNLISTEN" => Some(Command::Unlisten { channel }),
        _ => None,
    }
}

// ── INSERT ────────────────────────────────────────────────────

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = match &insert.table {
        TableObject::TableName(name) => table(&object_name_last(name)?)?,
        _ => return Err(SqlError::Unsupported("table function in INSERT".into())),
    };
    let returning = insert.returning.is_some();
    let mut rows = insert_rows(insert, table)?;

    match table {
        "facilities" => {
            let mut row = single_row(table, &mut rows)?;
            let name = row.required("name")?;
            row.finish()?;
            Ok(Command::InsertFacility { name, returning })
        }
        "users" => {
            let mut row = single_row(table, &mut rows)?;
            let id = row.take("id");
            let user = NewUser {
                first_name: row.required("first_name")?,
                last_name: row.required("last_name")?,
                role: Role::from_name(&row.take("role").unwrap_or_default()),
                email: row.required("email")?,
                password: row.required("password")?,
            };
            row.finish()?;
            Ok(match id {
                Some(id) => Command::ImportUser { id, user, returning },
                None => Command::InsertUser { user, returning },
            })
        }
        "reservations" => {
            let mut row = single_row(table, &mut rows)?;
            let reservation = NewReservation {
                facility: row.required("facility")?,
                date: date("date", &row.required("date")?)?,
                start: row.take("time_start").map(|t| time("time_start", &t)).transpose()?,
                end: row.take("time_end").map(|t| time("time_end", &t)).transpose()?,
                title: row.required("title")?,
                requester: row.take("requester"),
            };
            row.finish()?;
            Ok(Command::InsertReservation { reservation, returning })
        }
        "manual_events" if rows.first().is_some_and(|r| r.has("duplicate_of")) => {
            let mut row = single_row(table, &mut rows)?;
            let id = ulid("duplicate_of", &row.required("duplicate_of")?)?;
            let date = date("date", &row.required("date")?)?;
            row.finish()?;
            Ok(Command::DuplicateManualEvent { id, date, returning })
        }
        "manual_events" => {
            let events = rows
                .into_iter()
                .map(|mut row| {
                    let event = NewManualEvent {
                        facility: row.required("facility")?,
                        date: date("date", &row.required("date")?)?,
                        start: row.take("time_start").map(|t| time("time_start", &t)).transpose()?,
                        end: row.take("time_end").map(|t| time("time_end", &t)).transpose()?,
                        title: row.required("title")?,
                    };
                    row.finish()?;
                    Ok(event)
                })
                .collect::<Result<Vec<_>, SqlError>>()?;
            Ok(Command::InsertManualEvents { events, returning })
        }
        "activity_logs" => Err(SqlError::Unsupported("activity log entries are written by the server".into())),
        other => Err(SqlError::Unsupported(format!("INSERT into {other}"))),
    }
}

fn insert_rows(insert: &ast::Insert, table: &'static str) -> Result<Vec<Columns>, SqlError> {
    if insert.columns.is_empty() {
        return Err(SqlError::Parse(format!("{table}: INSERT needs a column list")));
    }
    let source = insert
        .source
        .as_ref()
        .ok_or_else(|| SqlError::Parse("INSERT without VALUES".into()))?;
    let SetExpr::Values(values) = source.body.as_ref() else {
        return Err(SqlError::Unsupported("INSERT ... SELECT".into()));
    };
    values
        .rows
        .iter()
        .map(|row| {
            if row.len() != insert.columns.len() {
                return Err(SqlError::Parse(format!(
                    "{table}: {} columns but {} values",
                    insert.columns.len(),
                    row.len()
                )));
            }
            let values = insert
                .columns
                .iter()
                .zip(row)
                .map(|(column, expr)| Ok((column.value.to_lowercase(), scalar(expr)?)))
                .collect::<Result<Vec<_>, SqlError>>()?;
            Ok(Columns { table, values })
        })
        .collect()
}

fn single_row(table: &'static str, rows: &mut Vec<Columns>) -> Result<Columns, SqlError> {
    match rows.len() {
        1 => rows.pop().ok_or(SqlError::Empty),
        n => Err(SqlError::Unsupported(format!("{table}: {n} rows in one INSERT"))),
    }
}

// ── UPDATE / DELETE ───────────────────────────────────────────

fn parse_update(
    target: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: Option<&Expr>,
) -> Result<Command, SqlError> {
    let table = table(&table_factor_name(&target.relation)?)?;
    let mut set = Columns {
        table,
        values: assignments
            .iter()
            .map(|a| match &a.target {
                AssignmentTarget::ColumnName(name) => Ok((object_name_last(name)?, scalar(&a.value)?)),
                AssignmentTarget::Tuple(_) => Err(SqlError::Unsupported("tuple assignment".into())),
            })
            .collect::<Result<Vec<_>, SqlError>>()?,
    };

    let cmd = match table {
        "facilities" => Command::RenameFacility {
            code: key(table, selection, "code")?,
            name: set.required("name")?,
        },
        "users" => Command::UpdateUser {
            id: key(table, selection, "id")?,
            update: UserUpdate {
                first_name: set.take("first_name"),
                last_name: set.take("last_name"),
                role: set.take("role").map(|r| Role::from_name(&r)),
                email: set.take("email"),
                password: set.take("password"),
            },
        },
        "reservations" => {
            let status = set.required("status")?;
            Command::SetReservationStatus {
                id: key(table, selection, "id")?,
                status: status.parse().map_err(|e: String| invalid("status", e))?,
            }
        }
        "manual_events" => Command::UpdateManualEvent {
            id: ulid("id", &key(table, selection, "id")?)?,
            update: ManualEventUpdate {
                date: set.take("date").map(|d| date("date", &d)).transpose()?,
                start: set.take("time_start").map(|t| time("time_start", &t)).transpose()?,
                end: set.take("time_end").map(|t| time("time_end", &t)).transpose()?,
                title: set.take("title"),
            },
        },
        "activity_logs" => return Err(SqlError::Unsupported("the activity log is append-only".into())),
        other => return Err(SqlError::Unsupported(format!("UPDATE on {other}"))),
    };
    set.finish()?;
    Ok(cmd)
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let tables = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    let first = tables
        .first()
        .ok_or_else(|| SqlError::Parse("DELETE without table".into()))?;
    let table = table(&table_factor_name(&first.relation)?)?;
    let selection = delete.selection.as_ref();

    match table {
        "facilities" => Ok(Command::DeleteFacility {
            code: key(table, selection, "code")?,
        }),
        "users" => Ok(Command::DeleteUser {
            id: key(table, selection, "id")?,
        }),
        "manual_events" => Ok(Command::DeleteManualEvent {
            id: ulid("id", &key(table, selection, "id")?)?,
        }),
        "reservations" => Err(SqlError::Unsupported("reservations are never deleted; reject them instead".into())),
        "activity_logs" => Err(SqlError::Unsupported("the activity log is append-only".into())),
        other => Err(SqlError::Unsupported(format!("DELETE from {other}"))),
    }
}

/// The single `column = value` filter that identifies a row.
fn key(table: &'static str, selection: Option<&Expr>, column: &'static str) -> Result<String, SqlError> {
    let mut filters = Filters::parse(table, selection)?;
    let value = filters.eq(column).ok_or(SqlError::MissingFilter(column))?;
    filters.finish()?;
    Ok(value)
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let SetExpr::Select(select) = query.body.as_ref() else {
        return Err(SqlError::Unsupported("non-SELECT query".into()));
    };
    let from = select
        .from
        .first()
        .ok_or_else(|| SqlError::Parse("SELECT without FROM".into()))?;
    let table = table(&table_factor_name(&from.relation)?)?;
    let mut filters = Filters::parse(table, select.selection.as_ref())?;
    let (limit, offset) = limit_offset(query)?;

    let cmd = match table {
        "facilities" => Command::SelectFacilities,
        "users" => Command::SelectUsers(UserFilter {
            role: filters.eq("role").map(|r| Role::from_name(&r)),
            search: filters
                .take("name", Op::Like)
                .or_else(|| filters.take("search", Op::Like))
                .or_else(|| filters.eq("search"))
                .map(|p| p.trim_matches('%').to_string())
                .filter(|p| !p.is_empty()),
            limit,
            offset,
        }),
        "reservations" => Command::SelectReservations(ReservationFilter {
            id: filters.eq("id"),
            facility: filters.eq("facility"),
            date: filters.eq("date").map(|d| date("date", &d)).transpose()?,
            status: filters
                .eq("status")
                .map(|s| s.parse().map_err(|e: String| invalid("status", e)))
                .transpose()?,
            requester: filters.eq("requester"),
        }),
        "manual_events" => Command::SelectManualEvents {
            facility: filters.eq("facility"),
            date: filters.eq("date").map(|d| date("date", &d)).transpose()?,
        },
        "activity_logs" => Command::SelectActivityLogs {
            user_id: filters.eq("user_id"),
            limit,
            offset,
        },
        "calendar" => {
            let (from, to) = match filters.eq("date") {
                Some(day) => {
                    let day = date("date", &day)?;
                    (day, day)
                }
                None => (
                    date("date", &filters.take("date", Op::GtEq).ok_or(SqlError::MissingFilter("date >="))?)?,
                    date("date", &filters.take("date", Op::LtEq).ok_or(SqlError::MissingFilter("date <="))?)?,
                ),
            };
            Command::SelectCalendar {
                from,
                to,
                facility: filters.eq("facility"),
            }
        }
        "conflicts" => Command::SelectConflicts {
            facility: filters.eq("facility").ok_or(SqlError::MissingFilter("facility"))?,
            date: date("date", &filters.eq("date").ok_or(SqlError::MissingFilter("date"))?)?,
            start: filters.eq("time_start").map(|t| time("time_start", &t)).transpose()?,
            end: filters.eq("time_end").map(|t| time("time_end", &t)).transpose()?,
        },
        "sessions" => Command::SelectSession {
            email: filters.eq("email").ok_or(SqlError::MissingFilter("email"))?,
            password: filters.eq("password").ok_or(SqlError::MissingFilter("password"))?,
        },
        other => return Err(SqlError::UnknownTable(other.to_string())),
    };
    filters.finish()?;
    Ok(cmd)
}

fn limit_offset(query: &ast::Query) -> Result<(Option<usize>, usize), SqlError> {
    match &query.limit_clause {
        None => Ok((None, 0)),
        Some(ast::LimitClause::LimitOffset { limit, offset, .. }) => {
            let limit = limit.as_ref().map(|e| count("limit", e)).transpose()?;
            let offset = offset.as_ref().map(|o| count("offset", &o.value)).transpose()?;
            Ok((limit, offset.unwrap_or(0)))
        }
        Some(ast::LimitClause::OffsetCommaLimit { offset, limit }) => {
            Ok((Some(count("limit", limit)?), count("offset", offset)?))
        }
    }
}

fn count(column: &str, expr: &Expr) -> Result<usize, SqlError> {
    let raw = scalar(expr)?.ok_or_else(|| invalid(column, "NULL"))?;
    raw.parse().map_err(|_| invalid(column, format!("{raw:?} is not a row count")))
}

// ── Row and filter plumbing ───────────────────────────────────

/// Column values of one VALUES row or one SET list. SQL NULL is `None`.
struct Columns {
    table: &'static str,
    values: Vec<(String, Option<String>)>,
}

impl Columns {
    fn has(&self, column: &str) -> bool {
        self.values.iter().any(|(c, _)| c == column)
    }

    fn take(&mut self, column: &str) -> Option<String> {
        let pos = self.values.iter().position(|(c, _)| c == column)?;
        self.values.remove(pos).1
    }

    fn required(&mut self, column: &'static str) -> Result<String, SqlError> {
        self.take(column).ok_or(SqlError::MissingColumn {
            table: self.table,
            column,
        })
    }

    /// Fails on any column nothing consumed.
    fn finish(self) -> Result<(), SqlError> {
        match self.values.into_iter().next() {
            Some((column, _)) => Err(SqlError::UnknownColumn {
                table: self.table,
                column,
            }),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    GtEq,
    LtEq,
    Like,
}

/// A WHERE clause flattened into `AND`-ed comparisons of a column against a literal.
struct Filters {
    table: &'static str,
    items: Vec<(String, Op, Option<String>)>,
}

impl Filters {
    fn parse(table: &'static str, selection: Option<&Expr>) -> Result<Self, SqlError> {
        let mut items = Vec::new();
        if let Some(expr) = selection {
            collect_filters(expr, &mut items)?;
        }
        Ok(Self { table, items })
    }

    fn take(&mut self, column: &str, op: Op) -> Option<String> {
        let pos = self.items.iter().position(|(c, o, _)| c == column && *o == op)?;
        self.items.remove(pos).2
    }

    fn eq(&mut self, column: &str) -> Option<String> {
        self.take(column, Op::Eq)
    }

    fn finish(self) -> Result<(), SqlError> {
        match self.items.first() {
            Some((column, _, _)) => Err(SqlError::Unsupported(format!("{}: cannot filter on {column}", self.table))),
            None => Ok(()),
        }
    }
}

fn collect_filters(expr: &Expr, out: &mut Vec<(String, Op, Option<String>)>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_filters(inner, out),
        Expr::BinaryOp { left, op, right } => {
            let op = match op {
                BinaryOperator::And => {
                    collect_filters(left, out)?;
                    return collect_filters(right, out);
                }
                BinaryOperator::Eq => Op::Eq,
                BinaryOperator::GtEq => Op::GtEq,
                BinaryOperator::LtEq => Op::LtEq,
                other => return Err(SqlError::Unsupported(format!("operator {other}"))),
            };
            let column = column_name(left).ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
            out.push((column, op, scalar(right)?));
            Ok(())
        }
        Expr::ILike {
            negated: false,
            expr,
            pattern,
            ..
        }
        | Expr::Like {
            negated: false,
            expr,
            pattern,
            ..
        } => {
            let column = column_name(expr).ok_or_else(|| SqlError::Unsupported(format!("filter on {expr}")))?;
            out.push((column, Op::Like, scalar(pattern)?));
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!("WHERE {other}"))),
    }
}

fn column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

/// A literal as text; NULL is `None`. Casts are looked through, so `'2025-06-02'::date` works.
fn scalar(expr: &Expr) -> Result<Option<String>, SqlError> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => match value {
            Value::Null => Ok(None),
            Value::SingleQuotedString(s) | Value::DoubleQuotedString(s) | Value::EscapedStringLiteral(s) => {
                Ok(Some(s.clone()))
            }
            Value::Number(n, _) => Ok(Some(n.to_string())),
            Value::Boolean(b) => Ok(Some(b.to_string())),
            Value::Placeholder(p) => Err(SqlError::Parse(format!("unbound parameter {p}"))),
            other => Err(SqlError::Unsupported(format!("value {other}"))),
        },
        Expr::UnaryOp {
            op: ast::UnaryOperator::Minus,
            expr,
        } => Ok(scalar(expr)?.map(|v| format!("-{v}"))),
        Expr::Nested(inner) | Expr::Cast { expr: inner, .. } => scalar(inner),
        other => Err(SqlError::Unsupported(format!("expression {other}"))),
    }
}

fn table(name: &str) -> Result<&'static str, SqlError> {
    TABLES
        .iter()
        .copied()
        .find(|t| *t == name)
        .ok_or_else(|| SqlError::UnknownTable(name.to_string()))
}

fn object_name_last(name: &ast::ObjectName) -> Result<String, SqlError> {
    match name.0.last() {
        Some(ObjectNamePart::Identifier(ident)) => Ok(ident.value.to_lowercase()),
        _ => Err(SqlError::Parse(format!("unsupported name {name}"))),
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => object_name_last(name),
        _ => Err(SqlError::Unsupported("complex table expression".into())),
    }
}

fn invalid(column: &str, reason: impl ToString) -> SqlError {
    SqlError::InvalidValue {
        column: column.to_string(),
        reason: reason.to_string(),
    }
}

fn date(column: &str, raw: &str) -> Result<NaiveDate, SqlError> {
    parse_date(raw).map_err(|e| invalid(column, e))
}

fn time(column: &str, raw: &str) -> Result<WallTime, SqlError> {
    raw.parse().map_err(|e: TimeError| invalid(column, e))
}

fn ulid(column: &str, raw: &str) -> Result<Ulid, SqlError> {
    Ulid::from_string(raw.trim()).map_err(|e| invalid(column, e))
}
