#[cfg(test)]
mod parser_tests {
    use treelox as lox;

    use lox::ast_printer::AstPrinter;
    use lox::parser::Parser;
    use lox::scanner::Scanner;
    use lox::token::Token;

    /// Scans and parses a clean program, rendering it in prefix form.
    fn parse_to_string(source: &str) -> String {
        let tokens: Vec<Token> = Scanner::new(source.as_bytes())
            .collect::<Result<Vec<_>, _>>()
            .expect("source should scan cleanly");

        let mut parser = Parser::new(&tokens);

        let statements = parser.parse().expect("source should parse cleanly");

        AstPrinter::print_program(&statements)
    }

    /// Scans and parses a bad program, returning the rendered errors.
    fn parse_errors(source: &str) -> Vec<String> {
        let tokens: Vec<Token> = Scanner::new(source.as_bytes())
            .collect::<Result<Vec<_>, _>>()
            .expect("source should scan cleanly");

        let mut parser = Parser::new(&tokens);

        match parser.parse() {
            Ok(statements) => panic!(
                "Expected parse errors, got: {}",
                AstPrinter::print_program(&statements)
            ),
            Err(errors) => errors.iter().map(ToString::to_string).collect(),
        }
    }

    #[test]
    fn test_parser_01_arithmetic_precedence() {
        assert_eq!(parse_to_string("1 + 2 * 3;"), "(+ 1.0 (* 2.0 3.0))");
        assert_eq!(parse_to_string("(1 + 2) * 3;"), "(* (group (+ 1.0 2.0)) 3.0)");
        assert_eq!(parse_to_string("-1 - -2;"), "(- (- 1.0) (- 2.0))");
    }

    #[test]
    fn test_parser_02_comparison_and_equality() {
        assert_eq!(parse_to_string("1 < 2 == true;"), "(== (< 1.0 2.0) true)");
        assert_eq!(parse_to_string("!!false != nil;"), "(!= (! (! false)) nil)");
    }

    #[test]
    fn test_parser_03_bitwise_sits_between_equality_and_comparison() {
        // `&` binds tighter than `==` ...
        assert_eq!(parse_to_string("1 & 2 == 3;"), "(== (& 1.0 2.0) 3.0)");

        // ... and looser than `<`.
        assert_eq!(parse_to_string("1 & 2 < 3;"), "(& 1.0 (< 2.0 3.0))");

        // Within the chain: `|` loosest, then `^`, then `&`.
        assert_eq!(
            parse_to_string("1 | 2 ^ 3 & 4;"),
            "(| 1.0 (^ 2.0 (& 3.0 4.0)))"
        );
    }

    #[test]
    fn test_parser_04_logical_operators() {
        assert_eq!(parse_to_string("1 or 2 and 3;"), "(or 1.0 (and 2.0 3.0))");
    }

    #[test]
    fn test_parser_05_ternary_is_right_associative() {
        assert_eq!(
            parse_to_string("1 ? 2 : 3 ? 4 : 5;"),
            "(?: 1.0 2.0 (?: 3.0 4.0 5.0))"
        );
    }

    #[test]
    fn test_parser_06_comma_is_lowest_precedence() {
        assert_eq!(parse_to_string("a = 1, 2;"), "(, (= a 1.0) 2.0)");
    }

    #[test]
    fn test_parser_07_assignment() {
        assert_eq!(parse_to_string("a = b = 2;"), "(= a (= b 2.0))");
        assert_eq!(parse_to_string("a.b = 2;"), "(set a b 2.0)");
    }

    #[test]
    fn test_parser_08_call_and_property_chains() {
        assert_eq!(parse_to_string("a.b(1).c;"), "(get (call (get a b) 1.0) c)");
        assert_eq!(parse_to_string("f()();"), "(call (call f))");
    }

    #[test]
    fn test_parser_09_for_desugars_to_while() {
        assert_eq!(
            parse_to_string("for (var i = 0; i < 3; i = i + 1) print i;"),
            "(block (var i 0.0) (while (< i 3.0) (block (print i) (= i (+ i 1.0)))))"
        );

        // Empty clauses: no wrapper block, condition defaults to true.
        assert_eq!(parse_to_string("for (;;) print 1;"), "(while true (print 1.0))");
    }

    #[test]
    fn test_parser_10_control_flow_statements() {
        assert_eq!(
            parse_to_string("if (a) print 1; else print 2;"),
            "(if a (print 1.0) (print 2.0))"
        );
        assert_eq!(
            parse_to_string("while (true) { break; continue; }"),
            "(while true (block (break) (continue)))"
        );
        assert_eq!(parse_to_string("return;"), "(return)");
        assert_eq!(parse_to_string("return 1;"), "(return 1.0)");
    }

    #[test]
    fn test_parser_11_function_declarations_and_lambdas() {
        assert_eq!(
            parse_to_string("fun add(a, b) { return a + b; }"),
            "(fun add (a b) (return (+ a b)))"
        );
        assert_eq!(
            parse_to_string("var f = fun (a) { return a; };"),
            "(var f (fun (a) (return a)))"
        );
        assert_eq!(
            parse_to_string("takes(fun () { print 1; });"),
            "(call takes (fun () (print 1.0)))"
        );
    }

    #[test]
    fn test_parser_12_class_declarations() {
        assert_eq!(parse_to_string("class Empty {}"), "(class Empty)");

        assert_eq!(
            parse_to_string("class B < A { m() { return 1; } static s() { return 2; } }"),
            "(class B (< A) (fun m () (return 1.0)) (static (fun s () (return 2.0))))"
        );
    }

    #[test]
    fn test_parser_13_this_and_super() {
        assert_eq!(
            parse_to_string("class B < A { m() { return super.m() + this.x; } }"),
            "(class B (< A) (fun m () (return (+ (call (super m)) (get this x)))))"
        );
    }

    #[test]
    fn test_parser_14_missing_semicolon() {
        let errors = parse_errors("print 1");

        assert_eq!(errors.len(), 1);
        assert!(
            errors[0].contains("Expected ';' after value"),
            "Unexpected error: {}",
            errors[0]
        );
    }

    #[test]
    fn test_parser_15_invalid_assignment_target() {
        let errors = parse_errors("1 + 2 = 3;");

        assert_eq!(errors.len(), 1);
        assert!(
            errors[0].contains("Invalid assignment target"),
            "Unexpected error: {}",
            errors[0]
        );
    }

    #[test]
    fn test_parser_16_recovers_and_reports_multiple_errors() {
        let errors = parse_errors("var = 1;\nprint +;\nvar ok = 2;");

        assert_eq!(errors.len(), 2, "Expected two errors, got: {:?}", errors);
        assert!(errors[0].contains("[line 1]"), "Unexpected error: {}", errors[0]);
        assert!(errors[1].contains("[line 2]"), "Unexpected error: {}", errors[1]);
    }

    #[test]
    fn test_parser_17_error_line_reporting() {
        let errors = parse_errors("1 +\n;");

        assert_eq!(errors.len(), 1);
        assert!(
            errors[0].contains("[line 2]") && errors[0].contains("Expected expression"),
            "Unexpected error: {}",
            errors[0]
        );
    }
}
