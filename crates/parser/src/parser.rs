use common::{DbError, DbResult};
use types::{DataType, Value};

use crate::ast::*;
use crate::lexer::Lexer;
use crate::token::{Kw, Tok, Token};

/// Recursive-descent parser over the token stream. Reports one error per
/// statement; on error the statement is rejected wholesale.
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn new(sql: &str) -> DbResult<Self> {
        let tokens = Lexer::new(sql).tokenize()?;
        Ok(Self { tokens, pos: 0 })
    }

    /// Parse every statement in the input, separated by semicolons.
    pub fn parse_statements(&mut self) -> DbResult<Vec<Statement>> {
        let mut statements = Vec::new();
        loop {
            while self.match_tok(Tok::Semicolon) {}
            if self.check(Tok::Eof) {
                return Ok(statements);
            }
            statements.push(self.parse_statement()?);
            if !self.check(Tok::Semicolon) && !self.check(Tok::Eof) {
                return Err(self.unexpected("';' or end of input"));
            }
        }
    }

    pub fn parse_statement(&mut self) -> DbResult<Statement> {
        let token = self.current().clone();
        let Tok::Kw(kw) = token.tok else {
            return Err(self.unexpected("a statement keyword"));
        };
        match kw {
            Kw::Select => Ok(Statement::Select(self.parse_select()?)),
            Kw::Insert => self.parse_insert(),
            Kw::Update => self.parse_update(),
            Kw::Delete => self.parse_delete(),
            Kw::Create => self.parse_create(),
            Kw::Drop => self.parse_drop(),
            Kw::Alter => self.parse_alter(),
            Kw::Show => self.parse_show(),
            Kw::Use => {
                self.advance();
                self.match_kw(Kw::Database);
                let name = self.expect_identifier("database name")?;
                Ok(Statement::UseDatabase { name })
            }
            Kw::Begin => {
                self.advance();
                self.match_kw(Kw::Transaction);
                Ok(Statement::Begin)
            }
            Kw::Commit => {
                self.advance();
                Ok(Statement::Commit)
            }
            Kw::Rollback => {
                self.advance();
                Ok(Statement::Rollback)
            }
            Kw::Save => {
                self.advance();
                Ok(Statement::Save)
            }
            Kw::Vacuum => {
                self.advance();
                let table = self.optional_identifier();
                Ok(Statement::Vacuum { table })
            }
            Kw::Analyze => {
                self.advance();
                self.match_kw(Kw::Table);
                let table = self.optional_identifier();
                Ok(Statement::Analyze { table })
            }
            Kw::Explain => {
                self.advance();
                if !self.check_kw(Kw::Select) {
                    return Err(self.unexpected("SELECT after EXPLAIN"));
                }
                let query = self.parse_select()?;
                Ok(Statement::Explain {
                    query: Box::new(query),
                })
            }
            Kw::Grant => self.parse_grant(),
            Kw::Revoke => self.parse_revoke(),
            _ => Err(self.unexpected("a statement keyword")),
        }
    }

    // ---- DML ----

    fn parse_select(&mut self) -> DbResult<SelectStatement> {
        self.expect_kw(Kw::Select, "SELECT")?;
        let mut stmt = SelectStatement {
            distinct: self.match_kw(Kw::Distinct),
            ..Default::default()
        };

        loop {
            if self.match_tok(Tok::Star) {
                stmt.select_list.push(SelectItem::Wildcard);
            } else {
                let expr = self.parse_expression()?;
                let alias = if self.match_kw(Kw::As) {
                    Some(self.expect_identifier("alias")?)
                } else {
                    self.optional_identifier()
                };
                stmt.select_list.push(SelectItem::Expr { expr, alias });
            }
            if !self.match_tok(Tok::Comma) {
                break;
            }
        }

        if self.match_kw(Kw::From) {
            stmt.from = Some(self.parse_table_reference()?);
            while let Some(join) = self.parse_join()? {
                stmt.joins.push(join);
            }
        }

        if self.match_kw(Kw::Where) {
            stmt.where_clause = Some(self.parse_expression()?);
        }

        if self.match_kw(Kw::Group) {
            self.expect_kw(Kw::By, "BY after GROUP")?;
            loop {
                stmt.group_by.push(self.parse_expression()?);
                if !self.match_tok(Tok::Comma) {
                    break;
                }
            }
            if self.match_kw(Kw::Having) {
                stmt.having = Some(self.parse_expression()?);
            }
        }

        if self.match_kw(Kw::Order) {
            self.expect_kw(Kw::By, "BY after ORDER")?;
            loop {
                let expr = self.parse_expression()?;
                let ascending = if self.match_kw(Kw::Desc) {
                    false
                } else {
                    self.match_kw(Kw::Asc);
                    true
                };
                stmt.order_by.push(OrderByItem { expr, ascending });
                if !self.match_tok(Tok::Comma) {
                    break;
                }
            }
        }

        if self.match_kw(Kw::Limit) {
            stmt.limit = Some(self.expect_unsigned("LIMIT count")?);
            if self.match_kw(Kw::Offset) {
                stmt.offset = Some(self.expect_unsigned("OFFSET count")?);
            }
        }

        if self.match_kw(Kw::Into) {
            self.expect_kw(Kw::Outfile, "OUTFILE after INTO")?;
            let path = self.expect_string("output file path")?;
            let format = if self.match_kw(Kw::Format) {
                if self.match_kw(Kw::Csv) {
                    OutFileFormat::Csv
                } else if self.match_kw(Kw::Json) {
                    OutFileFormat::Json
                } else if self.match_kw(Kw::Xml) {
                    OutFileFormat::Xml
                } else {
                    return Err(self.unexpected("CSV, JSON or XML"));
                }
            } else {
                OutFileFormat::Csv
            };
            stmt.into_outfile = Some(OutFile { path, format });
        }

        Ok(stmt)
    }

    fn parse_table_reference(&mut self) -> DbResult<TableReference> {
        let name = self.expect_identifier("table name")?;
        let alias = if self.match_kw(Kw::As) {
            Some(self.expect_identifier("alias")?)
        } else {
            self.optional_identifier()
        };
        Ok(TableReference { name, alias })
    }

    fn parse_join(&mut self) -> DbResult<Option<JoinClause>> {
        let join_type = if self.match_kw(Kw::Join) {
            JoinType::Inner
        } else if self.match_kw(Kw::Inner) {
            self.expect_kw(Kw::Join, "JOIN after INNER")?;
            JoinType::Inner
        } else if self.match_kw(Kw::Left) {
            self.match_kw(Kw::Outer);
            self.expect_kw(Kw::Join, "JOIN after LEFT")?;
            JoinType::Left
        } else if self.match_kw(Kw::Right) {
            self.match_kw(Kw::Outer);
            self.expect_kw(Kw::Join, "JOIN after RIGHT")?;
            JoinType::Right
        } else if self.match_kw(Kw::Full) {
            self.match_kw(Kw::Outer);
            self.expect_kw(Kw::Join, "JOIN after FULL")?;
            JoinType::Full
        } else if self.match_kw(Kw::Cross) {
            self.expect_kw(Kw::Join, "JOIN after CROSS")?;
            JoinType::Cross
        } else {
            return Ok(None);
        };

        let table = self.parse_table_reference()?;
        let on = if join_type == JoinType::Cross {
            None
        } else {
            self.expect_kw(Kw::On, "ON condition")?;
            Some(self.parse_expression()?)
        };
        Ok(Some(JoinClause {
            join_type,
            table,
            on,
        }))
    }

    fn parse_insert(&mut self) -> DbResult<Statement> {
        self.expect_kw(Kw::Insert, "INSERT")?;
        self.expect_kw(Kw::Into, "INTO after INSERT")?;
        let table = self.expect_identifier("table name")?;

        let mut columns = Vec::new();
        if self.match_tok(Tok::LParen) {
            loop {
                columns.push(self.expect_identifier("column name")?);
                if !self.match_tok(Tok::Comma) {
                    break;
                }
            }
            self.expect_tok(Tok::RParen, "')'")?;
        }

        let source = if self.match_kw(Kw::Values) {
            let mut rows = Vec::new();
            loop {
                self.expect_tok(Tok::LParen, "'(' before row values")?;
                let mut row = Vec::new();
                loop {
                    row.push(self.parse_expression()?);
                    if !self.match_tok(Tok::Comma) {
                        break;
                    }
                }
                self.expect_tok(Tok::RParen, "')' after row values")?;
                rows.push(row);
                if !self.match_tok(Tok::Comma) {
                    break;
                }
            }
            InsertSource::Values(rows)
        } else if self.check_kw(Kw::Select) {
            InsertSource::Select(Box::new(self.parse_select()?))
        } else {
            return Err(self.unexpected("VALUES or SELECT"));
        };

        Ok(Statement::Insert(InsertStatement {
            table,
            columns,
            source,
        }))
    }

    fn parse_update(&mut self) -> DbResult<Statement> {
        self.expect_kw(Kw::Update, "UPDATE")?;
        let table = self.expect_identifier("table name")?;
        self.expect_kw(Kw::Set, "SET")?;

        let mut assignments = Vec::new();
        loop {
            let column = self.expect_identifier("column name")?;
            self.expect_tok(Tok::Eq, "'='")?;
            assignments.push((column, self.parse_expression()?));
            if !self.match_tok(Tok::Comma) {
                break;
            }
        }

        let where_clause = if self.match_kw(Kw::Where) {
            Some(self.parse_expression()?)
        } else {
            None
        };

        Ok(Statement::Update(UpdateStatement {
            table,
            assignments,
            where_clause,
        }))
    }

    fn parse_delete(&mut self) -> DbResult<Statement> {
        self.expect_kw(Kw::Delete, "DELETE")?;
        self.expect_kw(Kw::From, "FROM after DELETE")?;
        let table = self.expect_identifier("table name")?;
        let where_clause = if self.match_kw(Kw::Where) {
            Some(self.parse_expression()?)
        } else {
            None
        };
        Ok(Statement::Delete(DeleteStatement {
            table,
            where_clause,
        }))
    }

    // ---- DDL ----

    fn parse_create(&mut self) -> DbResult<Statement> {
        self.expect_kw(Kw::Create, "CREATE")?;
        if self.match_kw(Kw::Table) {
            return self.parse_create_table();
        }
        if self.check_kw(Kw::Unique) || self.check_kw(Kw::Index) {
            let unique = self.match_kw(Kw::Unique);
            self.expect_kw(Kw::Index, "INDEX")?;
            return self.parse_create_index(unique);
        }
        if self.match_kw(Kw::Database) {
            let if_not_exists = self.parse_if_not_exists()?;
            let name = self.expect_identifier("database name")?;
            return Ok(Statement::CreateDatabase {
                name,
                if_not_exists,
            });
        }
        if self.match_kw(Kw::User) {
            let username = self.expect_identifier("user name")?;
            self.expect_kw(Kw::Identified, "IDENTIFIED")?;
            self.expect_kw(Kw::By, "BY")?;
            let password = self.expect_string("password")?;
            let is_admin = if self.match_kw(Kw::With) {
                self.expect_kw(Kw::Admin, "ADMIN after WITH")?;
                true
            } else {
                false
            };
            return Ok(Statement::CreateUser {
                username,
                password,
                is_admin,
            });
        }
        Err(self.unexpected("TABLE, INDEX, DATABASE or USER"))
    }

    fn parse_create_table(&mut self) -> DbResult<Statement> {
        let if_not_exists = self.parse_if_not_exists()?;
        let name = self.expect_identifier("table name")?;
        self.expect_tok(Tok::LParen, "'(' after table name")?;

        let mut columns: Vec<ColumnDefAst> = Vec::new();
        loop {
            if self.match_kw(Kw::Primary) {
                // Table-level PRIMARY KEY (col).
                self.expect_kw(Kw::Key, "KEY after PRIMARY")?;
                self.expect_tok(Tok::LParen, "'('")?;
                let pk_column = self.expect_identifier("column name")?;
                if self.match_tok(Tok::Comma) {
                    return Err(DbError::NotImplemented(
                        "composite PRIMARY KEY".into(),
                    ));
                }
                self.expect_tok(Tok::RParen, "')'")?;
                let column = columns
                    .iter_mut()
                    .find(|c| c.name.eq_ignore_ascii_case(&pk_column))
                    .ok_or_else(|| {
                        DbError::Syntax(format!("PRIMARY KEY references unknown column '{pk_column}'"))
                    })?;
                column.primary_key = true;
                column.not_null = true;
            } else {
                columns.push(self.parse_column_definition()?);
            }
            if !self.match_tok(Tok::Comma) {
                break;
            }
        }
        self.expect_tok(Tok::RParen, "')' after column list")?;

        Ok(Statement::CreateTable(CreateTableStatement {
            name,
            columns,
            if_not_exists,
        }))
    }

    fn parse_column_definition(&mut self) -> DbResult<ColumnDefAst> {
        let name = self.expect_identifier("column name")?;
        let (data_type, length, scale) = self.parse_data_type()?;
        let mut column = ColumnDefAst::new(name, data_type);
        column.length = length;
        column.scale = scale;

        loop {
            if self.match_kw(Kw::Primary) {
                self.expect_kw(Kw::Key, "KEY after PRIMARY")?;
                column.primary_key = true;
                column.not_null = true;
            } else if self.match_kw(Kw::Not) {
                self.expect_kw(Kw::Null, "NULL after NOT")?;
                column.not_null = true;
            } else if self.match_kw(Kw::Unique) {
                column.unique = true;
            } else if self.match_kw(Kw::AutoIncrement) {
                column.auto_increment = true;
            } else if self.match_kw(Kw::Default) {
                column.default_expr = Some(self.parse_expression()?);
            } else {
                break;
            }
        }
        Ok(column)
    }

    fn parse_data_type(&mut self) -> DbResult<(DataType, u32, u32)> {
        let token = self.current().clone();
        let Tok::Kw(kw) = token.tok else {
            return Err(self.unexpected("a data type"));
        };
        self.advance();

        let data_type = match kw {
            Kw::TinyInt => DataType::TinyInt,
            Kw::SmallInt => DataType::SmallInt,
            Kw::Int | Kw::Integer => DataType::Int,
            Kw::BigInt => DataType::BigInt,
            Kw::Float => DataType::Float,
            Kw::Double => DataType::Double,
            Kw::Decimal => DataType::Decimal,
            Kw::Char => DataType::Char,
            Kw::Varchar => DataType::Varchar,
            Kw::Text => DataType::Text,
            Kw::Blob => DataType::Blob,
            Kw::Boolean => DataType::Bool,
            Kw::Date => DataType::Date,
            Kw::Time => DataType::Time,
            Kw::DateTime => DataType::DateTime,
            _ => return Err(self.unexpected("a data type")),
        };

        let mut length = 0u32;
        let mut scale = 0u32;
        if self.match_tok(Tok::LParen) {
            length = self.expect_unsigned("length")? as u32;
            if self.match_tok(Tok::Comma) {
                scale = self.expect_unsigned("scale")? as u32;
            }
            self.expect_tok(Tok::RParen, "')'")?;
        }
        Ok((data_type, length, scale))
    }

    fn parse_create_index(&mut self, unique: bool) -> DbResult<Statement> {
        let if_not_exists = self.parse_if_not_exists()?;
        let name = self.expect_identifier("index name")?;
        self.expect_kw(Kw::On, "ON")?;
        let table = self.expect_identifier("table name")?;
        self.expect_tok(Tok::LParen, "'('")?;
        let mut columns = Vec::new();
        loop {
            columns.push(self.expect_identifier("column name")?);
            if !self.match_tok(Tok::Comma) {
                break;
            }
        }
        self.expect_tok(Tok::RParen, "')'")?;

        let index_type = if self.match_kw(Kw::Using) {
            if self.match_kw(Kw::BTree) {
                IndexType::BTree
            } else if self.match_kw(Kw::Hash) {
                IndexType::Hash
            } else if self.match_kw(Kw::FullText) {
                IndexType::FullText
            } else {
                return Err(self.unexpected("BTREE, HASH or FULLTEXT"));
            }
        } else {
            IndexType::BTree
        };

        Ok(Statement::CreateIndex(CreateIndexStatement {
            name,
            table,
            index_type,
            columns,
            unique,
            if_not_exists,
        }))
    }

    fn parse_drop(&mut self) -> DbResult<Statement> {
        self.expect_kw(Kw::Drop, "DROP")?;
        if self.match_kw(Kw::Table) {
            let if_exists = self.parse_if_exists()?;
            let name = self.expect_identifier("table name")?;
            return Ok(Statement::DropTable { name, if_exists });
        }
        if self.match_kw(Kw::Index) {
            let if_exists = self.parse_if_exists()?;
            let name = self.expect_identifier("index name")?;
            return Ok(Statement::DropIndex { name, if_exists });
        }
        if self.match_kw(Kw::Database) {
            let if_exists = self.parse_if_exists()?;
            let name = self.expect_identifier("database name")?;
            return Ok(Statement::DropDatabase { name, if_exists });
        }
        if self.match_kw(Kw::User) {
            let username = self.expect_identifier("user name")?;
            return Ok(Statement::DropUser { username });
        }
        Err(self.unexpected("TABLE, INDEX, DATABASE or USER"))
    }

    fn parse_alter(&mut self) -> DbResult<Statement> {
        self.expect_kw(Kw::Alter, "ALTER")?;
        if self.match_kw(Kw::User) {
            let username = self.expect_identifier("user name")?;
            self.expect_kw(Kw::Identified, "IDENTIFIED")?;
            self.expect_kw(Kw::By, "BY")?;
            let new_password = self.expect_string("password")?;
            return Ok(Statement::AlterUser {
                username,
                new_password,
            });
        }
        self.expect_kw(Kw::Table, "TABLE or USER after ALTER")?;
        let table = self.expect_identifier("table name")?;

        let op = if self.match_kw(Kw::Add) {
            self.match_kw(Kw::Column);
            AlterTableOp::AddColumn(self.parse_column_definition()?)
        } else if self.match_kw(Kw::Drop) {
            self.match_kw(Kw::Column);
            AlterTableOp::DropColumn(self.expect_identifier("column name")?)
        } else if self.match_kw(Kw::Modify) {
            self.match_kw(Kw::Column);
            AlterTableOp::ModifyColumn(self.parse_column_definition()?)
        } else if self.match_kw(Kw::Rename) {
            self.match_kw(Kw::Column);
            let from = self.expect_identifier("column name")?;
            self.expect_kw(Kw::To, "TO")?;
            let to = self.expect_identifier("new column name")?;
            AlterTableOp::RenameColumn { from, to }
        } else {
            return Err(self.unexpected("ADD, DROP, MODIFY or RENAME"));
        };

        Ok(Statement::AlterTable(AlterTableStatement { table, op }))
    }

    fn parse_show(&mut self) -> DbResult<Statement> {
        self.expect_kw(Kw::Show, "SHOW")?;
        if self.match_kw(Kw::Tables) {
            return Ok(Statement::ShowTables);
        }
        if self.match_kw(Kw::Indexes) {
            let table = if self.match_kw(Kw::From) {
                Some(self.expect_identifier("table name")?)
            } else {
                None
            };
            return Ok(Statement::ShowIndexes { table });
        }
        if self.match_kw(Kw::Databases) {
            return Ok(Statement::ShowDatabases);
        }
        Err(self.unexpected("TABLES, INDEXES or DATABASES"))
    }

    fn parse_privilege(&mut self) -> DbResult<Privilege> {
        if self.match_kw(Kw::Select) {
            Ok(Privilege::Select)
        } else if self.match_kw(Kw::Insert) {
            Ok(Privilege::Insert)
        } else if self.match_kw(Kw::Update) {
            Ok(Privilege::Update)
        } else if self.match_kw(Kw::Delete) {
            Ok(Privilege::Delete)
        } else if self.match_kw(Kw::All) {
            Ok(Privilege::All)
        } else {
            Err(self.unexpected("SELECT, INSERT, UPDATE, DELETE or ALL"))
        }
    }

    fn parse_grant_target(&mut self) -> DbResult<(String, Option<String>)> {
        let database = self.expect_identifier("database name")?;
        self.expect_tok(Tok::Dot, "'.'")?;
        if self.match_tok(Tok::Star) {
            Ok((database, None))
        } else {
            Ok((database, Some(self.expect_identifier("table name")?)))
        }
    }

    fn parse_grant(&mut self) -> DbResult<Statement> {
        self.expect_kw(Kw::Grant, "GRANT")?;
        let privilege = self.parse_privilege()?;
        self.expect_kw(Kw::On, "ON")?;
        let (database, table) = self.parse_grant_target()?;
        self.expect_kw(Kw::To, "TO")?;
        let username = self.expect_identifier("user name")?;
        let with_grant_option = if self.match_kw(Kw::With) {
            self.expect_kw(Kw::Grant, "GRANT after WITH")?;
            self.expect_kw(Kw::Option, "OPTION after GRANT")?;
            true
        } else {
            false
        };
        Ok(Statement::Grant(GrantStatement {
            privilege,
            database,
            table,
            username,
            with_grant_option,
        }))
    }

    fn parse_revoke(&mut self) -> DbResult<Statement> {
        self.expect_kw(Kw::Revoke, "REVOKE")?;
        let privilege = self.parse_privilege()?;
        self.expect_kw(Kw::On, "ON")?;
        let (database, table) = self.parse_grant_target()?;
        self.expect_kw(Kw::From, "FROM")?;
        let username = self.expect_identifier("user name")?;
        Ok(Statement::Revoke(RevokeStatement {
            privilege,
            database,
            table,
            username,
        }))
    }

    // ---- Expressions (standard precedence: OR < AND < NOT < comparison
    // < additive < multiplicative < unary < primary) ----

    pub fn parse_expression(&mut self) -> DbResult<Expression> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> DbResult<Expression> {
        let mut left = self.parse_and()?;
        while self.match_kw(Kw::Or) {
            let right = self.parse_and()?;
            left = Expression::Binary {
                left: Box::new(left),
                op: BinaryOp::Or,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> DbResult<Expression> {
        let mut left = self.parse_not()?;
        while self.match_kw(Kw::And) {
            let right = self.parse_not()?;
            left = Expression::Binary {
                left: Box::new(left),
                op: BinaryOp::And,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> DbResult<Expression> {
        if self.match_kw(Kw::Not) {
            let expr = self.parse_not()?;
            return Ok(Expression::Unary {
                op: UnaryOp::Not,
                expr: Box::new(expr),
            });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> DbResult<Expression> {
        let mut expr = self.parse_additive()?;

        loop {
            let op = match self.current().tok {
                Tok::Eq => Some(BinaryOp::Eq),
                Tok::Ne => Some(BinaryOp::Ne),
                Tok::Lt => Some(BinaryOp::Lt),
                Tok::Le => Some(BinaryOp::Le),
                Tok::Gt => Some(BinaryOp::Gt),
                Tok::Ge => Some(BinaryOp::Ge),
                _ => None,
            };
            if let Some(op) = op {
                self.advance();
                let right = self.parse_additive()?;
                expr = Expression::Binary {
                    left: Box::new(expr),
                    op,
                    right: Box::new(right),
                };
                continue;
            }

            if self.match_kw(Kw::Is) {
                let negated = self.match_kw(Kw::Not);
                self.expect_kw(Kw::Null, "NULL after IS")?;
                expr = Expression::IsNull {
                    expr: Box::new(expr),
                    negated,
                };
                continue;
            }

            // NOT LIKE / NOT IN / NOT BETWEEN.
            let negated = if self.check_kw(Kw::Not)
                && matches!(
                    self.peek().tok,
                    Tok::Kw(Kw::Like) | Tok::Kw(Kw::In) | Tok::Kw(Kw::Between)
                ) {
                self.advance();
                true
            } else {
                false
            };

            if self.match_kw(Kw::Like) {
                let pattern = self.parse_additive()?;
                expr = Expression::Like {
                    expr: Box::new(expr),
                    pattern: Box::new(pattern),
                    negated,
                };
                continue;
            }
            if self.match_kw(Kw::In) {
                self.expect_tok(Tok::LParen, "'(' after IN")?;
                if self.check_kw(Kw::Select) {
                    let subquery = self.parse_select()?;
                    self.expect_tok(Tok::RParen, "')'")?;
                    expr = Expression::InSubquery {
                        expr: Box::new(expr),
                        subquery: Box::new(subquery),
                        negated,
                    };
                } else {
                    let mut list = Vec::new();
                    loop {
                        list.push(self.parse_expression()?);
                        if !self.match_tok(Tok::Comma) {
                            break;
                        }
                    }
                    self.expect_tok(Tok::RParen, "')'")?;
                    expr = Expression::InList {
                        expr: Box::new(expr),
                        list,
                        negated,
                    };
                }
                continue;
            }
            if self.match_kw(Kw::Between) {
                let low = self.parse_additive()?;
                self.expect_kw(Kw::And, "AND in BETWEEN")?;
                let high = self.parse_additive()?;
                expr = Expression::Between {
                    expr: Box::new(expr),
                    low: Box::new(low),
                    high: Box::new(high),
                    negated,
                };
                continue;
            }
            if negated {
                return Err(self.unexpected("LIKE, IN or BETWEEN after NOT"));
            }
            return Ok(expr);
        }
    }

    fn parse_additive(&mut self) -> DbResult<Expression> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.current().tok {
                Tok::Plus => BinaryOp::Add,
                Tok::Minus => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Expression::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }
    }

    fn parse_multiplicative(&mut self) -> DbResult<Expression> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.current().tok {
                Tok::Star => BinaryOp::Mul,
                Tok::Slash => BinaryOp::Div,
                Tok::Percent => BinaryOp::Mod,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_unary()?;
            left = Expression::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }
    }

    fn parse_unary(&mut self) -> DbResult<Expression> {
        if self.match_tok(Tok::Minus) {
            let expr = self.parse_unary()?;
            return Ok(Expression::Unary {
                op: UnaryOp::Minus,
                expr: Box::new(expr),
            });
        }
        if self.match_tok(Tok::Plus) {
            let expr = self.parse_unary()?;
            return Ok(Expression::Unary {
                op: UnaryOp::Plus,
                expr: Box::new(expr),
            });
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> DbResult<Expression> {
        let token = self.current().clone();

        match token.tok {
            Tok::Integer => {
                self.advance();
                let value = token.lexeme.parse::<i64>().map_err(|_| {
                    DbError::Syntax(format!("integer literal '{}' out of range", token.lexeme))
                })?;
                Ok(Expression::Literal(Value::BigInt(value)))
            }
            Tok::Float => {
                self.advance();
                let value = token.lexeme.parse::<f64>().map_err(|_| {
                    DbError::Syntax(format!("bad numeric literal '{}'", token.lexeme))
                })?;
                Ok(Expression::Literal(Value::Double(value)))
            }
            Tok::StringLit => {
                self.advance();
                Ok(Expression::Literal(Value::Text(token.lexeme)))
            }
            Tok::Kw(Kw::True) => {
                self.advance();
                Ok(Expression::Literal(Value::Bool(true)))
            }
            Tok::Kw(Kw::False) => {
                self.advance();
                Ok(Expression::Literal(Value::Bool(false)))
            }
            Tok::Kw(Kw::Null) => {
                self.advance();
                Ok(Expression::Literal(Value::Null))
            }
            Tok::Kw(Kw::Count)
            | Tok::Kw(Kw::Sum)
            | Tok::Kw(Kw::Avg)
            | Tok::Kw(Kw::Min)
            | Tok::Kw(Kw::Max) => self.parse_aggregate(),
            Tok::Kw(Kw::Case) => self.parse_case(),
            Tok::Kw(Kw::Match) => self.parse_match(),
            Tok::Ident => {
                self.advance();
                if self.match_tok(Tok::LParen) {
                    let mut args = Vec::new();
                    if !self.check(Tok::RParen) {
                        loop {
                            args.push(self.parse_expression()?);
                            if !self.match_tok(Tok::Comma) {
                                break;
                            }
                        }
                    }
                    self.expect_tok(Tok::RParen, "')' after arguments")?;
                    return Ok(Expression::FunctionCall {
                        name: token.lexeme.to_uppercase(),
                        args,
                    });
                }
                if self.match_tok(Tok::Dot) {
                    let column = self.expect_identifier("column name")?;
                    return Ok(Expression::Column {
                        table: Some(token.lexeme),
                        name: column,
                    });
                }
                Ok(Expression::Column {
                    table: None,
                    name: token.lexeme,
                })
            }
            Tok::LParen => {
                self.advance();
                if self.check_kw(Kw::Select) {
                    let subquery = self.parse_select()?;
                    self.expect_tok(Tok::RParen, "')' after subquery")?;
                    return Ok(Expression::Subquery(Box::new(subquery)));
                }
                let expr = self.parse_expression()?;
                self.expect_tok(Tok::RParen, "')'")?;
                Ok(expr)
            }
            _ => Err(self.unexpected("an expression")),
        }
    }

    fn parse_aggregate(&mut self) -> DbResult<Expression> {
        let func = match self.current().tok {
            Tok::Kw(Kw::Count) => AggFunc::Count,
            Tok::Kw(Kw::Sum) => AggFunc::Sum,
            Tok::Kw(Kw::Avg) => AggFunc::Avg,
            Tok::Kw(Kw::Min) => AggFunc::Min,
            Tok::Kw(Kw::Max) => AggFunc::Max,
            _ => return Err(self.unexpected("an aggregate function")),
        };
        self.advance();
        self.expect_tok(Tok::LParen, "'('")?;
        let distinct = self.match_kw(Kw::Distinct);
        let arg = if self.match_tok(Tok::Star) {
            if func != AggFunc::Count {
                return Err(DbError::Syntax(format!("{func}(*) is not valid")));
            }
            None
        } else {
            Some(Box::new(self.parse_expression()?))
        };
        self.expect_tok(Tok::RParen, "')'")?;
        Ok(Expression::Aggregate {
            func,
            arg,
            distinct,
        })
    }

    fn parse_case(&mut self) -> DbResult<Expression> {
        self.expect_kw(Kw::Case, "CASE")?;
        let mut whens = Vec::new();
        while self.match_kw(Kw::When) {
            let condition = self.parse_expression()?;
            self.expect_kw(Kw::Then, "THEN")?;
            let result = self.parse_expression()?;
            whens.push((condition, result));
        }
        if whens.is_empty() {
            return Err(DbError::Syntax("CASE requires at least one WHEN".into()));
        }
        let else_expr = if self.match_kw(Kw::Else) {
            Some(Box::new(self.parse_expression()?))
        } else {
            None
        };
        self.expect_kw(Kw::End, "END")?;
        Ok(Expression::Case { whens, else_expr })
    }

    fn parse_match(&mut self) -> DbResult<Expression> {
        self.expect_kw(Kw::Match, "MATCH")?;
        self.expect_tok(Tok::LParen, "'('")?;
        let mut columns = Vec::new();
        loop {
            columns.push(self.expect_identifier("column name")?);
            if !self.match_tok(Tok::Comma) {
                break;
            }
        }
        self.expect_tok(Tok::RParen, "')'")?;
        self.expect_kw(Kw::Against, "AGAINST")?;
        self.expect_tok(Tok::LParen, "'('")?;
        let query = self.expect_string("search query")?;
        let boolean_mode = if self.match_kw(Kw::In) {
            self.expect_kw(Kw::Boolean, "BOOLEAN")?;
            self.expect_kw(Kw::Mode, "MODE")?;
            true
        } else {
            false
        };
        self.expect_tok(Tok::RParen, "')'")?;
        Ok(Expression::Match {
            columns,
            query,
            boolean_mode,
        })
    }

    // ---- Token helpers ----

    fn current(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn peek(&self) -> &Token {
        self.tokens
            .get(self.pos + 1)
            .unwrap_or_else(|| self.tokens.last().expect("tokens end with Eof"))
    }

    fn advance(&mut self) {
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
    }

    fn parse_if_not_exists(&mut self) -> DbResult<bool> {
        if self.match_kw(Kw::If) {
            self.expect_kw(Kw::Not, "NOT after IF")?;
            self.expect_kw(Kw::Exists, "EXISTS after IF NOT")?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn parse_if_exists(&mut self) -> DbResult<bool> {
        if self.match_kw(Kw::If) {
            self.expect_kw(Kw::Exists, "EXISTS after IF")?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn check(&self, tok: Tok) -> bool {
        self.current().tok == tok
    }

    fn check_kw(&self, kw: Kw) -> bool {
        self.current().tok == Tok::Kw(kw)
    }

    fn match_tok(&mut self, tok: Tok) -> bool {
        if self.check(tok) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn match_kw(&mut self, kw: Kw) -> bool {
        self.match_tok(Tok::Kw(kw))
    }

    fn expect_tok(&mut self, tok: Tok, what: &str) -> DbResult<()> {
        if self.match_tok(tok) {
            Ok(())
        } else {
            Err(self.unexpected(what))
        }
    }

    fn expect_kw(&mut self, kw: Kw, what: &str) -> DbResult<()> {
        self.expect_tok(Tok::Kw(kw), what)
    }

    fn expect_identifier(&mut self, what: &str) -> DbResult<String> {
        let token = self.current().clone();
        if token.tok == Tok::Ident {
            self.advance();
            Ok(token.lexeme)
        } else {
            Err(self.unexpected(what))
        }
    }

    fn optional_identifier(&mut self) -> Option<String> {
        let token = self.current().clone();
        if token.tok == Tok::Ident {
            self.advance();
            Some(token.lexeme)
        } else {
            None
        }
    }

    fn expect_string(&mut self, what: &str) -> DbResult<String> {
        let token = self.current().clone();
        if token.tok == Tok::StringLit {
            self.advance();
            Ok(token.lexeme)
        } else {
            Err(self.unexpected(what))
        }
    }

    fn expect_unsigned(&mut self, what: &str) -> DbResult<u64> {
        let token = self.current().clone();
        if token.tok == Tok::Integer {
            self.advance();
            token
                .lexeme
                .parse::<u64>()
                .map_err(|_| DbError::Syntax(format!("bad {what} '{}'", token.lexeme)))
        } else {
            Err(self.unexpected(what))
        }
    }

    fn unexpected(&self, expected: &str) -> DbError {
        let token = self.current();
        DbError::Syntax(format!(
            "expected {expected}, found {token} at line {}, column {}",
            token.line, token.column
        ))
    }
}
