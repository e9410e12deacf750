use std::fmt;

use types::{DataType, Value};

/// A parsed SQL statement.
#[derive(Clone, Debug, PartialEq)]
pub enum Statement {
    Select(SelectStatement),
    Insert(InsertStatement),
    Update(UpdateStatement),
    Delete(DeleteStatement),
    CreateTable(CreateTableStatement),
    DropTable {
        name: String,
        if_exists: bool,
    },
    AlterTable(AlterTableStatement),
    CreateIndex(CreateIndexStatement),
    DropIndex {
        name: String,
        if_exists: bool,
    },
    CreateDatabase {
        name: String,
        if_not_exists: bool,
    },
    DropDatabase {
        name: String,
        if_exists: bool,
    },
    UseDatabase {
        name: String,
    },
    ShowTables,
    ShowIndexes {
        table: Option<String>,
    },
    ShowDatabases,
    Begin,
    Commit,
    Rollback,
    Save,
    Vacuum {
        table: Option<String>,
    },
    Analyze {
        table: Option<String>,
    },
    Explain {
        query: Box<SelectStatement>,
    },
    CreateUser {
        username: String,
        password: String,
        is_admin: bool,
    },
    DropUser {
        username: String,
    },
    AlterUser {
        username: String,
        new_password: String,
    },
    Grant(GrantStatement),
    Revoke(RevokeStatement),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Minus,
    Plus,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AggFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl fmt::Display for AggFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AggFunc::Count => "COUNT",
            AggFunc::Sum => "SUM",
            AggFunc::Avg => "AVG",
            AggFunc::Min => "MIN",
            AggFunc::Max => "MAX",
        })
    }
}

/// Expression tree. Every node prints back to parsable SQL, so a statement
/// survives a parse → print → parse round trip.
#[derive(Clone, Debug, PartialEq)]
pub enum Expression {
    Literal(Value),
    Column {
        table: Option<String>,
        name: String,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expression>,
    },
    Binary {
        left: Box<Expression>,
        op: BinaryOp,
        right: Box<Expression>,
    },
    /// `COUNT(*)` carries no argument.
    Aggregate {
        func: AggFunc,
        arg: Option<Box<Expression>>,
        distinct: bool,
    },
    FunctionCall {
        name: String,
        args: Vec<Expression>,
    },
    Case {
        whens: Vec<(Expression, Expression)>,
        else_expr: Option<Box<Expression>>,
    },
    IsNull {
        expr: Box<Expression>,
        negated: bool,
    },
    Like {
        expr: Box<Expression>,
        pattern: Box<Expression>,
        negated: bool,
    },
    InList {
        expr: Box<Expression>,
        list: Vec<Expression>,
        negated: bool,
    },
    InSubquery {
        expr: Box<Expression>,
        subquery: Box<SelectStatement>,
        negated: bool,
    },
    Between {
        expr: Box<Expression>,
        low: Box<Expression>,
        high: Box<Expression>,
        negated: bool,
    },
    Subquery(Box<SelectStatement>),
    Match {
        columns: Vec<String>,
        query: String,
        boolean_mode: bool,
    },
}

impl Expression {
    /// Columns referenced anywhere in this expression, as `(table, name)`.
    pub fn referenced_columns(&self, out: &mut Vec<(Option<String>, String)>) {
        match self {
            Expression::Literal(_) => {}
            Expression::Column { table, name } => {
                out.push((table.clone(), name.clone()));
            }
            Expression::Unary { expr, .. } => expr.referenced_columns(out),
            Expression::Binary { left, right, .. } => {
                left.referenced_columns(out);
                right.referenced_columns(out);
            }
            Expression::Aggregate { arg, .. } => {
                if let Some(arg) = arg {
                    arg.referenced_columns(out);
                }
            }
            Expression::FunctionCall { args, .. } => {
                for arg in args {
                    arg.referenced_columns(out);
                }
            }
            Expression::Case { whens, else_expr } => {
                for (cond, result) in whens {
                    cond.referenced_columns(out);
                    result.referenced_columns(out);
                }
                if let Some(else_expr) = else_expr {
                    else_expr.referenced_columns(out);
                }
            }
            Expression::IsNull { expr, .. } => expr.referenced_columns(out),
            Expression::Like { expr, pattern, .. } => {
                expr.referenced_columns(out);
                pattern.referenced_columns(out);
            }
            Expression::InList { expr, list, .. } => {
                expr.referenced_columns(out);
                for item in list {
                    item.referenced_columns(out);
                }
            }
            Expression::InSubquery { expr, .. } => expr.referenced_columns(out),
            Expression::Between {
                expr, low, high, ..
            } => {
                expr.referenced_columns(out);
                low.referenced_columns(out);
                high.referenced_columns(out);
            }
            Expression::Subquery(_) => {}
            Expression::Match { columns, .. } => {
                for column in columns {
                    out.push((None, column.clone()));
                }
            }
        }
    }

    /// True when no column reference or subquery appears anywhere below.
    pub fn is_constant(&self) -> bool {
        match self {
            Expression::Literal(_) => true,
            Expression::Column { .. } | Expression::Subquery(_) => false,
            Expression::InSubquery { .. } | Expression::Match { .. } => false,
            Expression::Unary { expr, .. } => expr.is_constant(),
            Expression::Binary { left, right, .. } => left.is_constant() && right.is_constant(),
            Expression::Aggregate { .. } => false,
            Expression::FunctionCall { args, .. } => args.iter().all(|a| a.is_constant()),
            Expression::Case { whens, else_expr } => {
                whens.iter().all(|(c, r)| c.is_constant() && r.is_constant())
                    && else_expr.as_ref().map_or(true, |e| e.is_constant())
            }
            Expression::IsNull { expr, .. } => expr.is_constant(),
            Expression::Like { expr, pattern, .. } => expr.is_constant() && pattern.is_constant(),
            Expression::InList { expr, list, .. } => {
                expr.is_constant() && list.iter().all(|i| i.is_constant())
            }
            Expression::Between {
                expr, low, high, ..
            } => expr.is_constant() && low.is_constant() && high.is_constant(),
        }
    }

    /// True when an aggregate function appears anywhere below.
    pub fn contains_aggregate(&self) -> bool {
        match self {
            Expression::Aggregate { .. } => true,
            Expression::Literal(_)
            | Expression::Column { .. }
            | Expression::Subquery(_)
            | Expression::Match { .. } => false,
            Expression::Unary { expr, .. } => expr.contains_aggregate(),
            Expression::Binary { left, right, .. } => {
                left.contains_aggregate() || right.contains_aggregate()
            }
            Expression::FunctionCall { args, .. } => args.iter().any(|a| a.contains_aggregate()),
            Expression::Case { whens, else_expr } => {
                whens
                    .iter()
                    .any(|(c, r)| c.contains_aggregate() || r.contains_aggregate())
                    || else_expr.as_ref().is_some_and(|e| e.contains_aggregate())
            }
            Expression::IsNull { expr, .. } => expr.contains_aggregate(),
            Expression::Like { expr, pattern, .. } => {
                expr.contains_aggregate() || pattern.contains_aggregate()
            }
            Expression::InList { expr, list, .. } => {
                expr.contains_aggregate() || list.iter().any(|i| i.contains_aggregate())
            }
            Expression::InSubquery { expr, .. } => expr.contains_aggregate(),
            Expression::Between {
                expr, low, high, ..
            } => {
                expr.contains_aggregate() || low.contains_aggregate() || high.contains_aggregate()
            }
        }
    }
}

fn sql_string_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

fn literal_to_sql(value: &Value) -> String {
    match value {
        Value::Char(s) | Value::Varchar(s) | Value::Text(s) => sql_string_literal(s),
        Value::Date(_) | Value::Time(_) | Value::DateTime(_) => {
            sql_string_literal(&value.to_string())
        }
        other => other.to_string(),
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Literal(value) => f.write_str(&literal_to_sql(value)),
            Expression::Column { table, name } => match table {
                Some(table) => write!(f, "{table}.{name}"),
                None => f.write_str(name),
            },
            Expression::Unary { op, expr } => match op {
                UnaryOp::Not => write!(f, "NOT ({expr})"),
                UnaryOp::Minus => write!(f, "-({expr})"),
                UnaryOp::Plus => write!(f, "+({expr})"),
            },
            Expression::Binary { left, op, right } => {
                write!(f, "({left} {} {right})", op.symbol())
            }
            Expression::Aggregate {
                func,
                arg,
                distinct,
            } => {
                let distinct = if *distinct { "DISTINCT " } else { "" };
                match arg {
                    Some(arg) => write!(f, "{func}({distinct}{arg})"),
                    None => write!(f, "{func}(*)"),
                }
            }
            Expression::FunctionCall { name, args } => {
                let rendered: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                write!(f, "{name}({})", rendered.join(", "))
            }
            Expression::Case { whens, else_expr } => {
                f.write_str("CASE")?;
                for (cond, result) in whens {
                    write!(f, " WHEN {cond} THEN {result}")?;
                }
                if let Some(else_expr) = else_expr {
                    write!(f, " ELSE {else_expr}")?;
                }
                f.write_str(" END")
            }
            Expression::IsNull { expr, negated } => {
                write!(f, "({expr} IS {}NULL)", if *negated { "NOT " } else { "" })
            }
            Expression::Like {
                expr,
                pattern,
                negated,
            } => write!(
                f,
                "({expr} {}LIKE {pattern})",
                if *negated { "NOT " } else { "" }
            ),
            Expression::InList {
                expr,
                list,
                negated,
            } => {
                let rendered: Vec<String> = list.iter().map(|i| i.to_string()).collect();
                write!(
                    f,
                    "({expr} {}IN ({}))",
                    if *negated { "NOT " } else { "" },
                    rendered.join(", ")
                )
            }
            Expression::InSubquery {
                expr,
                subquery,
                negated,
            } => write!(
                f,
                "({expr} {}IN ({subquery}))",
                if *negated { "NOT " } else { "" }
            ),
            Expression::Between {
                expr,
                low,
                high,
                negated,
            } => write!(
                f,
                "({expr} {}BETWEEN {low} AND {high})",
                if *negated { "NOT " } else { "" }
            ),
            Expression::Subquery(select) => write!(f, "({select})"),
            Expression::Match {
                columns,
                query,
                boolean_mode,
            } => {
                write!(
                    f,
                    "MATCH({}) AGAINST({}{})",
                    columns.join(", "),
                    sql_string_literal(query),
                    if *boolean_mode { " IN BOOLEAN MODE" } else { "" }
                )
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SelectItem {
    Wildcard,
    Expr {
        expr: Expression,
        alias: Option<String>,
    },
}

impl fmt::Display for SelectItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectItem::Wildcard => f.write_str("*"),
            SelectItem::Expr { expr, alias } => match alias {
                Some(alias) => write!(f, "{expr} AS {alias}"),
                None => write!(f, "{expr}"),
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TableReference {
    pub name: String,
    pub alias: Option<String>,
}

impl TableReference {
    /// Alias when present, table name otherwise.
    pub fn effective_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

impl fmt::Display for TableReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.alias {
            Some(alias) => write!(f, "{} AS {alias}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
    Cross,
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JoinType::Inner => "INNER JOIN",
            JoinType::Left => "LEFT JOIN",
            JoinType::Right => "RIGHT JOIN",
            JoinType::Full => "FULL JOIN",
            JoinType::Cross => "CROSS JOIN",
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct JoinClause {
    pub join_type: JoinType,
    pub table: TableReference,
    pub on: Option<Expression>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OrderByItem {
    pub expr: Expression,
    pub ascending: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutFileFormat {
    Csv,
    Json,
    Xml,
}

impl fmt::Display for OutFileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OutFileFormat::Csv => "CSV",
            OutFileFormat::Json => "JSON",
            OutFileFormat::Xml => "XML",
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct OutFile {
    pub path: String,
    pub format: OutFileFormat,
}

#[derive(Clone, Debug, PartialEq, Default)]
pub struct SelectStatement {
    pub distinct: bool,
    pub select_list: Vec<SelectItem>,
    pub from: Option<TableReference>,
    pub joins: Vec<JoinClause>,
    pub where_clause: Option<Expression>,
    pub group_by: Vec<Expression>,
    pub having: Option<Expression>,
    pub order_by: Vec<OrderByItem>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub into_outfile: Option<OutFile>,
}

impl fmt::Display for SelectStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SELECT ")?;
        if self.distinct {
            f.write_str("DISTINCT ")?;
        }
        let items: Vec<String> = self.select_list.iter().map(|i| i.to_string()).collect();
        f.write_str(&items.join(", "))?;
        if let Some(from) = &self.from {
            write!(f, " FROM {from}")?;
        }
        for join in &self.joins {
            write!(f, " {} {}", join.join_type, join.table)?;
            if let Some(on) = &join.on {
                write!(f, " ON {on}")?;
            }
        }
        if let Some(where_clause) = &self.where_clause {
            write!(f, " WHERE {where_clause}")?;
        }
        if !self.group_by.is_empty() {
            let exprs: Vec<String> = self.group_by.iter().map(|e| e.to_string()).collect();
            write!(f, " GROUP BY {}", exprs.join(", "))?;
            if let Some(having) = &self.having {
                write!(f, " HAVING {having}")?;
            }
        }
        if !self.order_by.is_empty() {
            let items: Vec<String> = self
                .order_by
                .iter()
                .map(|o| {
                    format!("{}{}", o.expr, if o.ascending { "" } else { " DESC" })
                })
                .collect();
            write!(f, " ORDER BY {}", items.join(", "))?;
        }
        if let Some(limit) = self.limit {
            write!(f, " LIMIT {limit}")?;
        }
        if let Some(offset) = self.offset {
            write!(f, " OFFSET {offset}")?;
        }
        if let Some(outfile) = &self.into_outfile {
            write!(
                f,
                " INTO OUTFILE {} FORMAT {}",
                sql_string_literal(&outfile.path),
                outfile.format
            )?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum InsertSource {
    Values(Vec<Vec<Expression>>),
    Select(Box<SelectStatement>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct InsertStatement {
    pub table: String,
    pub columns: Vec<String>,
    pub source: InsertSource,
}

#[derive(Clone, Debug, PartialEq)]
pub struct UpdateStatement {
    pub table: String,
    pub assignments: Vec<(String, Expression)>,
    pub where_clause: Option<Expression>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DeleteStatement {
    pub table: String,
    pub where_clause: Option<Expression>,
}

/// Column definition as parsed from DDL.
#[derive(Clone, Debug, PartialEq)]
pub struct ColumnDefAst {
    pub name: String,
    pub data_type: DataType,
    pub length: u32,
    pub scale: u32,
    pub not_null: bool,
    pub primary_key: bool,
    pub unique: bool,
    pub auto_increment: bool,
    pub default_expr: Option<Expression>,
}

impl ColumnDefAst {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            length: 0,
            scale: 0,
            not_null: false,
            primary_key: false,
            unique: false,
            auto_increment: false,
            default_expr: None,
        }
    }
}

impl fmt::Display for ColumnDefAst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.data_type)?;
        if self.length > 0 {
            if self.scale > 0 {
                write!(f, "({}, {})", self.length, self.scale)?;
            } else {
                write!(f, "({})", self.length)?;
            }
        }
        if self.primary_key {
            f.write_str(" PRIMARY KEY")?;
        }
        if self.not_null && !self.primary_key {
            f.write_str(" NOT NULL")?;
        }
        if self.unique {
            f.write_str(" UNIQUE")?;
        }
        if self.auto_increment {
            f.write_str(" AUTO_INCREMENT")?;
        }
        if let Some(default_expr) = &self.default_expr {
            write!(f, " DEFAULT {default_expr}")?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CreateTableStatement {
    pub name: String,
    pub columns: Vec<ColumnDefAst>,
    pub if_not_exists: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexType {
    BTree,
    Hash,
    FullText,
}

impl fmt::Display for IndexType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IndexType::BTree => "BTREE",
            IndexType::Hash => "HASH",
            IndexType::FullText => "FULLTEXT",
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CreateIndexStatement {
    pub name: String,
    pub table: String,
    pub index_type: IndexType,
    pub columns: Vec<String>,
    pub unique: bool,
    pub if_not_exists: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum AlterTableOp {
    AddColumn(ColumnDefAst),
    DropColumn(String),
    ModifyColumn(ColumnDefAst),
    RenameColumn { from: String, to: String },
}

#[derive(Clone, Debug, PartialEq)]
pub struct AlterTableStatement {
    pub table: String,
    pub op: AlterTableOp,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Privilege {
    Select,
    Insert,
    Update,
    Delete,
    All,
}

impl fmt::Display for Privilege {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Privilege::Select => "SELECT",
            Privilege::Insert => "INSERT",
            Privilege::Update => "UPDATE",
            Privilege::Delete => "DELETE",
            Privilege::All => "ALL",
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct GrantStatement {
    pub privilege: Privilege,
    pub database: String,
    /// `None` means the whole database (`db.*`).
    pub table: Option<String>,
    pub username: String,
    pub with_grant_option: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RevokeStatement {
    pub privilege: Privilege,
    pub database: String,
    pub table: Option<String>,
    pub username: String,
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Select(select) => write!(f, "{select}"),
            Statement::Insert(insert) => {
                write!(f, "INSERT INTO {}", insert.table)?;
                if !insert.columns.is_empty() {
                    write!(f, " ({})", insert.columns.join(", "))?;
                }
                match &insert.source {
                    InsertSource::Values(rows) => {
                        f.write_str(" VALUES ")?;
                        let rendered: Vec<String> = rows
                            .iter()
                            .map(|row| {
                                let cells: Vec<String> =
                                    row.iter().map(|e| e.to_string()).collect();
                                format!("({})", cells.join(", "))
                            })
                            .collect();
                        f.write_str(&rendered.join(", "))
                    }
                    InsertSource::Select(select) => write!(f, " {select}"),
                }
            }
            Statement::Update(update) => {
                let sets: Vec<String> = update
                    .assignments
                    .iter()
                    .map(|(col, expr)| format!("{col} = {expr}"))
                    .collect();
                write!(f, "UPDATE {} SET {}", update.table, sets.join(", "))?;
                if let Some(where_clause) = &update.where_clause {
                    write!(f, " WHERE {where_clause}")?;
                }
                Ok(())
            }
            Statement::Delete(delete) => {
                write!(f, "DELETE FROM {}", delete.table)?;
                if let Some(where_clause) = &delete.where_clause {
                    write!(f, " WHERE {where_clause}")?;
                }
                Ok(())
            }
            Statement::CreateTable(create) => {
                write!(f, "CREATE TABLE ")?;
                if create.if_not_exists {
                    f.write_str("IF NOT EXISTS ")?;
                }
                let columns: Vec<String> =
                    create.columns.iter().map(|c| c.to_string()).collect();
                write!(f, "{} ({})", create.name, columns.join(", "))
            }
            Statement::DropTable { name, if_exists } => {
                write!(
                    f,
                    "DROP TABLE {}{name}",
                    if *if_exists { "IF EXISTS " } else { "" }
                )
            }
            Statement::AlterTable(alter) => {
                write!(f, "ALTER TABLE {} ", alter.table)?;
                match &alter.op {
                    AlterTableOp::AddColumn(column) => write!(f, "ADD COLUMN {column}"),
                    AlterTableOp::DropColumn(name) => write!(f, "DROP COLUMN {name}"),
                    AlterTableOp::ModifyColumn(column) => write!(f, "MODIFY COLUMN {column}"),
                    AlterTableOp::RenameColumn { from, to } => {
                        write!(f, "RENAME COLUMN {from} TO {to}")
                    }
                }
            }
            Statement::CreateIndex(create) => {
                write!(f, "CREATE ")?;
                if create.unique {
                    f.write_str("UNIQUE ")?;
                }
                f.write_str("INDEX ")?;
                if create.if_not_exists {
                    f.write_str("IF NOT EXISTS ")?;
                }
                write!(
                    f,
                    "{} ON {} ({}) USING {}",
                    create.name,
                    create.table,
                    create.columns.join(", "),
                    create.index_type
                )
            }
            Statement::DropIndex { name, if_exists } => {
                write!(
                    f,
                    "DROP INDEX {}{name}",
                    if *if_exists { "IF EXISTS " } else { "" }
                )
            }
            Statement::CreateDatabase {
                name,
                if_not_exists,
            } => write!(
                f,
                "CREATE DATABASE {}{name}",
                if *if_not_exists { "IF NOT EXISTS " } else { "" }
            ),
            Statement::DropDatabase { name, if_exists } => write!(
                f,
                "DROP DATABASE {}{name}",
                if *if_exists { "IF EXISTS " } else { "" }
            ),
            Statement::UseDatabase { name } => write!(f, "USE DATABASE {name}"),
            Statement::ShowTables => f.write_str("SHOW TABLES"),
            Statement::ShowIndexes { table } => match table {
                Some(table) => write!(f, "SHOW INDEXES FROM {table}"),
                None => f.write_str("SHOW INDEXES"),
            },
            Statement::ShowDatabases => f.write_str("SHOW DATABASES"),
            Statement::Begin => f.write_str("BEGIN"),
            Statement::Commit => f.write_str("COMMIT"),
            Statement::Rollback => f.write_str("ROLLBACK"),
            Statement::Save => f.write_str("SAVE"),
            Statement::Vacuum { table } => match table {
                Some(table) => write!(f, "VACUUM {table}"),
                None => f.write_str("VACUUM"),
            },
            Statement::Analyze { table } => match table {
                Some(table) => write!(f, "ANALYZE TABLE {table}"),
                None => f.write_str("ANALYZE"),
            },
            Statement::Explain { query } => write!(f, "EXPLAIN {query}"),
            Statement::CreateUser {
                username,
                password,
                is_admin,
            } => write!(
                f,
                "CREATE USER {username} IDENTIFIED BY {}{}",
                sql_string_literal(password),
                if *is_admin { " WITH ADMIN" } else { "" }
            ),
            Statement::DropUser { username } => write!(f, "DROP USER {username}"),
            Statement::AlterUser {
                username,
                new_password,
            } => write!(
                f,
                "ALTER USER {username} IDENTIFIED BY {}",
                sql_string_literal(new_password)
            ),
            Statement::Grant(grant) => {
                write!(
                    f,
                    "GRANT {} ON {}.{} TO {}",
                    grant.privilege,
                    grant.database,
                    grant.table.as_deref().unwrap_or("*"),
                    grant.username
                )?;
                if grant.with_grant_option {
                    f.write_str(" WITH GRANT OPTION")?;
                }
                Ok(())
            }
            Statement::Revoke(revoke) => write!(
                f,
                "REVOKE {} ON {}.{} FROM {}",
                revoke.privilege,
                revoke.database,
                revoke.table.as_deref().unwrap_or("*"),
                revoke.username
            ),
        }
    }
}
