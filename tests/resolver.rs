#[cfg(test)]
mod resolver_tests {
    use treelox as lox;

    use lox::interpreter::Interpreter;
    use lox::parser::Parser;
    use lox::resolver::Resolver;
    use lox::scanner::Scanner;
    use lox::token::Token;

    /// Scans, parses, and resolves a program, returning the rendered
    /// resolution errors (empty for a clean program).
    fn resolve_errors(source: &str) -> Vec<String> {
        let tokens: Vec<Token> = Scanner::new(source.as_bytes())
            .collect::<Result<Vec<_>, _>>()
            .expect("source should scan cleanly");

        let mut parser = Parser::new(&tokens);

        let statements = parser.parse().expect("source should parse cleanly");

        let mut interpreter = Interpreter::new();
        let mut resolver = Resolver::new(&mut interpreter);

        match resolver.resolve(&statements) {
            Ok(()) => Vec::new(),
            Err(errors) => errors.iter().map(ToString::to_string).collect(),
        }
    }

    fn assert_clean(source: &str) {
        let errors = resolve_errors(source);

        assert!(errors.is_empty(), "Expected no errors, got: {:?}", errors);
    }

    fn assert_single_error(source: &str, fragment: &str) {
        let errors = resolve_errors(source);

        assert_eq!(errors.len(), 1, "Expected one error, got: {:?}", errors);
        assert!(
            errors[0].contains(fragment),
            "Expected '{}' in: {}",
            fragment,
            errors[0]
        );
    }

    #[test]
    fn test_resolver_01_own_initializer_read() {
        // The outer binding does not rescue the inner read.
        assert_single_error(
            "var a = 1;\n{ var a = a; print a; }",
            "Cannot read local variable in its own initializer.",
        );
    }

    #[test]
    fn test_resolver_02_duplicate_declaration_in_scope() {
        assert_single_error(
            "{ var a = 1; var a = 2; print a; }",
            "Already a variable with this name in this scope.",
        );

        // Globals may be redefined freely.
        assert_clean("var a = 1; var a = 2; print a;");
    }

    #[test]
    fn test_resolver_03_top_level_return() {
        assert_single_error("return 1;", "Cannot return from top-level code.");
    }

    #[test]
    fn test_resolver_04_initializer_returns() {
        assert_single_error(
            "class Foo { init() { return 1; } }",
            "Cannot return a value from an initializer.",
        );

        // A bare return only exits early; the instance is still produced.
        assert_clean("class Foo { init() { return; } }");
    }

    #[test]
    fn test_resolver_05_break_outside_loop() {
        assert_single_error("break;", "Cannot use 'break' outside of a loop.");

        // A function body is its own loop context.
        assert_single_error(
            "while (true) { fun f() { break; } f(); }",
            "Cannot use 'break' outside of a loop.",
        );
    }

    #[test]
    fn test_resolver_06_continue_outside_loop() {
        assert_single_error("continue;", "Cannot use 'continue' outside of a loop.");

        assert_clean("while (true) { continue; }");
    }

    #[test]
    fn test_resolver_07_this_outside_class() {
        assert_single_error("print this;", "Cannot use 'this' outside of a class.");

        assert_single_error(
            "fun f() { return this; } f();",
            "Cannot use 'this' outside of a class.",
        );
    }

    #[test]
    fn test_resolver_08_super_misuse() {
        assert_single_error("super.m();", "Cannot use 'super' outside of a class.");

        assert_single_error(
            "class A { m() { return super.m(); } }",
            "Cannot use 'super' in a class with no superclass.",
        );
    }

    #[test]
    fn test_resolver_09_unused_local_reported_at_declaration() {
        let errors = resolve_errors("{\n  var unused = 1;\n}");

        assert_eq!(errors.len(), 1, "Expected one error, got: {:?}", errors);
        assert!(
            errors[0].contains("Local variable 'unused' is never used."),
            "Unexpected error: {}",
            errors[0]
        );
        assert!(
            errors[0].contains("[line 2]"),
            "Error should point at the declaration: {}",
            errors[0]
        );
    }

    #[test]
    fn test_resolver_10_initializer_does_not_exempt_unused() {
        assert_single_error(
            "{ var a = compute(); }",
            "Local variable 'a' is never used.",
        );
    }

    #[test]
    fn test_resolver_11_names_exempt_from_unused_analysis() {
        // Parameters and declaration names never count as unused.
        assert_clean("fun f(a, b) { return a; } f(1, 2);");
        assert_clean("{ fun helper() { return 1; } }");
        assert_clean("{ class Quiet {} }");
    }

    #[test]
    fn test_resolver_12_static_initializer_rejected() {
        assert_single_error(
            "class Foo { static init() { return 1; } }",
            "Initializer 'init' cannot be a static method.",
        );

        // Outside a class body the name carries no meaning.
        assert_clean("fun init() { return 1; } init();");
    }

    #[test]
    fn test_resolver_13_this_in_static_resolves() {
        // Statics resolve like methods; the miss surfaces at runtime.
        assert_clean("class Foo { static s() { return this; } }");
    }

    #[test]
    fn test_resolver_14_local_self_inheritance() {
        assert_single_error(
            "{ class A < A {} }",
            "Cannot read local variable in its own initializer.",
        );
    }

    #[test]
    fn test_resolver_15_loop_context_restored() {
        let errors = resolve_errors("while (true) { break; }\nbreak;");

        assert_eq!(errors.len(), 1, "Expected one error, got: {:?}", errors);
        assert!(errors[0].contains("[line 2]"), "Unexpected error: {}", errors[0]);
    }

    #[test]
    fn test_resolver_16_clean_programs() {
        assert_clean(
            "fun makeCounter() {\n  var count = 0;\n  return fun () {\n    count = count + 1;\n    return count;\n  };\n}\nvar counter = makeCounter();\ncounter();",
        );

        assert_clean(
            "class A { m() { return this.x; } }\nclass B < A { m() { return super.m(); } }\nB();",
        );

        assert_clean("var f = fun () { return 1; }; f();");
    }

    #[test]
    fn test_resolver_17_reads_from_inner_scopes_count() {
        assert_clean("{ var a = 1; { print a; } }");

        // Assignment alone is still a use.
        assert_clean("{ var a = 1; a = 2; }");
    }
}
