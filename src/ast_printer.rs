use crate::parser::{Expr, FunctionDecl, LiteralValue, Stmt};

/// Renders the syntax tree in the classic parenthesized prefix form (no
/// heap allocations except `String` joins for output). One line per
/// top-level statement; expression statements print as the bare expression.
pub struct AstPrinter;

impl AstPrinter {
    pub fn print_program(statements: &[Stmt<'_>]) -> String {
        statements
            .iter()
            .map(Self::print_stmt)
            .collect::<Vec<String>>()
            .join("\n")
    }

    pub fn print_stmt(stmt: &Stmt<'_>) -> String {
        match stmt {
            Stmt::Expression(expr) => Self::print(expr),

            Stmt::Print(expr) => format!("(print {})", Self::print(expr)),

            Stmt::Var { name, initializer } => match initializer {
                Some(expr) => format!("(var {} {})", name.lexeme, Self::print(expr)),
                None => format!("(var {})", name.lexeme),
            },

            Stmt::Block(statements) => {
                let mut s = String::from("(block");

                for inner in statements {
                    s.push(' ');
                    s.push_str(&Self::print_stmt(inner));
                }

                s.push(')');
                s
            }

            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => match else_branch {
                Some(else_stmt) => format!(
                    "(if {} {} {})",
                    Self::print(condition),
                    Self::print_stmt(then_branch),
                    Self::print_stmt(else_stmt)
                ),

                None => format!(
                    "(if {} {})",
                    Self::print(condition),
                    Self::print_stmt(then_branch)
                ),
            },

            Stmt::While { condition, body } => format!(
                "(while {} {})",
                Self::print(condition),
                Self::print_stmt(body)
            ),

            Stmt::Function(declaration) => Self::print_function(declaration),

            Stmt::Class {
                name,
                superclass,
                methods,
                statics,
            } => {
                let mut s = format!("(class {}", name.lexeme);

                if let Some(Expr::Variable { name: parent, .. }) = superclass {
                    s.push_str(&format!(" (< {})", parent.lexeme));
                }

                for method in methods {
                    s.push(' ');
                    s.push_str(&Self::print_function(method));
                }

                for method in statics {
                    s.push_str(" (static ");
                    s.push_str(&Self::print_function(method));
                    s.push(')');
                }

                s.push(')');
                s
            }

            Stmt::Break { .. } => "(break)".into(),

            Stmt::Continue { .. } => "(continue)".into(),

            Stmt::Return { value, .. } => match value {
                Some(expr) => format!("(return {})", Self::print(expr)),
                None => "(return)".into(),
            },
        }
    }

    pub fn print(expr: &Expr<'_>) -> String {
        match expr {
            // ── literals ────────────────────────────────────────────────
            Expr::Literal(lit) => match lit {
                LiteralValue::True => "true".into(),

                LiteralValue::False => "false".into(),

                LiteralValue::Nil => "nil".into(),

                LiteralValue::Str(s) => s.clone(),

                LiteralValue::Number(n) => {
                    if n.fract() == 0.0 {
                        // 3 → 3.0
                        format!("{:.1}", n)
                    } else {
                        n.to_string()
                    }
                }
            },

            // ── grouping ────────────────────────────────────────────────
            Expr::Grouping(inner) => format!("(group {})", Self::print(inner)),

            // ── unary operator ──────────────────────────────────────────
            Expr::Unary { operator, right } => {
                format!("({} {})", operator.lexeme, Self::print(right))
            }

            // ── binary operator ─────────────────────────────────────────
            Expr::Binary {
                left,
                operator,
                right,
            } => format!(
                "({} {} {})",
                operator.lexeme,
                Self::print(left),
                Self::print(right)
            ),

            // ── ternary ────────────────────────────────────────────────
            Expr::Ternary {
                condition,
                first,
                second,
            } => format!(
                "(?: {} {} {})",
                Self::print(condition),
                Self::print(first),
                Self::print(second)
            ),

            // ── logical operator ───────────────────────────────────────
            Expr::Logical {
                left,
                operator,
                right,
            } => format!(
                "({} {} {})",
                operator.lexeme,
                Self::print(left),
                Self::print(right)
            ),

            // ── variables and assignment ───────────────────────────────
            Expr::Variable { name, .. } => name.lexeme.into(),

            Expr::Assign { name, value, .. } => {
                format!("(= {} {})", name.lexeme, Self::print(value))
            }

            // ── calls and anonymous functions ──────────────────────────
            Expr::Call {
                callee, arguments, ..
            } => {
                let mut s = format!("(call {}", Self::print(callee));

                for arg in arguments {
                    s.push(' ');
                    s.push_str(&Self::print(arg));
                }

                s.push(')');
                s
            }

            Expr::Lambda(declaration) => Self::print_function(declaration),

            // ── property access ────────────────────────────────────────
            Expr::Get { object, name } => {
                format!("(get {} {})", Self::print(object), name.lexeme)
            }

            Expr::Set {
                object,
                name,
                value,
            } => format!(
                "(set {} {} {})",
                Self::print(object),
                name.lexeme,
                Self::print(value)
            ),

            Expr::This { .. } => "this".into(),

            Expr::Super { method, .. } => format!("(super {})", method.lexeme),
        }
    }

    fn print_function(declaration: &FunctionDecl<'_>) -> String {
        let mut s = String::from("(fun ");

        if let Some(name) = &declaration.name {
            s.push_str(name.lexeme);
            s.push(' ');
        }

        s.push('(');

        for (index, param) in declaration.params.iter().enumerate() {
            if index > 0 {
                s.push(' ');
            }

            s.push_str(param.lexeme);
        }

        s.push(')');

        for stmt in &declaration.body {
            s.push(' ');
            s.push_str(&Self::print_stmt(stmt));
        }

        s.push(')');
        s
    }
}
