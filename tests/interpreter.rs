#[cfg(test)]
mod interpreter_tests {
    use std::cell::RefCell;
    use std::io::{self, Write};
    use std::rc::Rc;

    use treelox as lox;

    use lox::interpreter::Interpreter;
    use lox::parser::{Parser, Stmt};
    use lox::resolver::Resolver;
    use lox::scanner::Scanner;
    use lox::token::Token;

    /// A `Write` sink the test keeps a handle to after handing the
    /// interpreter its clone.
    #[derive(Clone, Default)]
    struct SharedOutput(Rc<RefCell<Vec<u8>>>);

    impl SharedOutput {
        fn contents(&self) -> String {
            String::from_utf8(self.0.borrow().clone()).expect("printed output should be UTF-8")
        }
    }

    impl Write for SharedOutput {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn parse_source(source: &str) -> Vec<Stmt<'_>> {
        let tokens: Vec<Token> = Scanner::new(source.as_bytes())
            .collect::<Result<Vec<_>, _>>()
            .expect("source should scan cleanly");

        let mut parser = Parser::new(&tokens);

        parser.parse().expect("source should parse cleanly")
    }

    /// Full pipeline over one program: panics on static errors, returns
    /// whatever it printed plus the interpreter's result.
    fn run(source: &str) -> (String, Result<Option<String>, String>) {
        let statements = parse_source(source);

        let sink = SharedOutput::default();
        let mut interpreter = Interpreter::with_output(Box::new(sink.clone()));

        {
            let mut resolver = Resolver::new(&mut interpreter);

            if let Err(errors) = resolver.resolve(&statements) {
                let rendered: Vec<String> = errors.iter().map(ToString::to_string).collect();
                panic!("Unexpected resolution errors: {:?}", rendered);
            }
        }

        let result = interpreter
            .interpret(&statements)
            .map(|value| value.map(|v| v.to_string()))
            .map_err(|e| e.to_string());

        (sink.contents(), result)
    }

    fn run_output(source: &str) -> String {
        let (output, result) = run(source);

        if let Err(e) = result {
            panic!("Unexpected runtime error: {e}\nOutput so far: {output}");
        }

        output
    }

    fn run_value(source: &str) -> Option<String> {
        let (_, result) = run(source);

        result.expect("program should run cleanly")
    }

    fn run_runtime_error(source: &str) -> (String, String) {
        let (output, result) = run(source);

        match result {
            Ok(_) => panic!("Expected a runtime error, output: {output}"),
            Err(e) => (output, e),
        }
    }

    // ───────────────────── closures and scoping ────────────────────

    #[test]
    fn closure_counter_increments_captured_state() {
        let output = run_output(
            "fun makeCounter() {\n\
             \x20 var count = 0;\n\
             \x20 return fun () {\n\
             \x20   count = count + 1;\n\
             \x20   return count;\n\
             \x20 };\n\
             }\n\
             var counter = makeCounter();\n\
             print counter();\n\
             print counter();",
        );

        assert_eq!(output, "1\n2\n");
    }

    #[test]
    fn separate_counters_do_not_share_state() {
        let output = run_output(
            "fun makeCounter() {\n\
             \x20 var count = 0;\n\
             \x20 return fun () {\n\
             \x20   count = count + 1;\n\
             \x20   return count;\n\
             \x20 };\n\
             }\n\
             var first = makeCounter();\n\
             var second = makeCounter();\n\
             print first();\n\
             print first();\n\
             print second();",
        );

        assert_eq!(output, "1\n2\n1\n");
    }

    #[test]
    fn block_shadowing_restores_outer_binding() {
        let output = run_output("var a = 1;\n{\n  var a = 2;\n  print a;\n}\nprint a;");

        assert_eq!(output, "2\n1\n");
    }

    #[test]
    fn function_keeps_its_definition_scope() {
        // The later shadowing declaration must not rebind the closure.
        let output = run_output(
            "var a = \"global\";\n\
             {\n\
             \x20 fun showA() {\n\
             \x20   print a;\n\
             \x20 }\n\
             \x20 showA();\n\
             \x20 var a = \"block\";\n\
             \x20 showA();\n\
             \x20 print a;\n\
             }",
        );

        assert_eq!(output, "global\nglobal\nblock\n");
    }

    #[test]
    fn closures_keep_scope_alive_after_block_exit() {
        let output = run_output(
            "var inc;\n\
             var get;\n\
             {\n\
             \x20 var shared = 0;\n\
             \x20 inc = fun () { shared = shared + 1; };\n\
             \x20 get = fun () { return shared; };\n\
             }\n\
             inc();\n\
             inc();\n\
             print get();",
        );

        assert_eq!(output, "2\n");
    }

    #[test]
    fn nested_shadowing_resolves_to_nearest_declaration() {
        let output = run_output(
            "var x = \"depth0\";\n\
             {\n\
             \x20 var x = \"depth1\";\n\
             \x20 {\n\
             \x20   var x = \"depth2\";\n\
             \x20   {\n\
             \x20     print x;\n\
             \x20   }\n\
             \x20   print x;\n\
             \x20 }\n\
             \x20 print x;\n\
             }\n\
             print x;",
        );

        assert_eq!(output, "depth2\ndepth2\ndepth1\ndepth0\n");
    }

    #[test]
    fn recursive_function_calls_itself_by_name() {
        let output = run_output(
            "fun fib(n) {\n\
             \x20 if (n < 2) return n;\n\
             \x20 return fib(n - 1) + fib(n - 2);\n\
             }\n\
             print fib(10);",
        );

        assert_eq!(output, "55\n");
    }

    // ───────────────────── operators and coercion ──────────────────

    #[test]
    fn logical_operators_yield_operand_values() {
        let output = run_output(
            "print \"hi\" or 2;\nprint nil or \"yes\";\nprint nil and \"no\";\nprint 1 and 2;",
        );

        assert_eq!(output, "hi\nyes\nnil\n2\n");
    }

    #[test]
    fn only_nil_and_false_are_falsey() {
        let output = run_output(
            "print 0 ? \"zero is truthy\" : \"zero is falsey\";\n\
             print \"\" and \"empty is truthy\";",
        );

        assert_eq!(output, "zero is truthy\nempty is truthy\n");
    }

    #[test]
    fn ternary_evaluates_only_the_taken_branch() {
        let output = run_output(
            "fun chosen() {\n\
             \x20 print \"chosen\";\n\
             \x20 return 1;\n\
             }\n\
             fun skipped() {\n\
             \x20 print \"skipped\";\n\
             \x20 return 2;\n\
             }\n\
             print true ? chosen() : skipped();\n\
             print false ? chosen() : skipped();",
        );

        assert_eq!(output, "chosen\n1\nskipped\n2\n");
    }

    #[test]
    fn comma_evaluates_left_and_yields_right() {
        let output = run_output(
            "fun side() {\n\
             \x20 print \"side\";\n\
             \x20 return 1;\n\
             }\n\
             print (side(), 2);",
        );

        assert_eq!(output, "side\n2\n");
    }

    #[test]
    fn bitwise_operators_truncate_to_integers() {
        let output = run_output("print 6.9 & 3;\nprint 1.5 | 2.25;\nprint 7 ^ 2;\nprint -1 & 255;");

        assert_eq!(output, "2\n3\n5\n255\n");
    }

    #[test]
    fn string_number_concatenation_works_both_ways() {
        let output =
            run_output("print \"x\" + 1;\nprint 1 + \"x\";\nprint \"v\" + 1.5;\nprint 2 + \"nd\";");

        assert_eq!(output, "x1\n1x\nv1.5\n2nd\n");
    }

    #[test]
    fn integral_numbers_print_without_decimals() {
        let output = run_output("print 3.0;\nprint 2.5;\nprint 10 / 4;");

        assert_eq!(output, "3\n2.5\n2.5\n");
    }

    #[test]
    fn equality_is_by_value_for_primitives_and_identity_for_objects() {
        let output = run_output(
            "print 1 == 1;\n\
             print 1 == \"1\";\n\
             print \"a\" == \"a\";\n\
             print nil == nil;\n\
             class Box {}\n\
             var b = Box();\n\
             print b == b;\n\
             print b == Box();",
        );

        assert_eq!(output, "true\nfalse\ntrue\ntrue\ntrue\nfalse\n");
    }

    #[test]
    fn assignment_is_an_expression_yielding_the_value() {
        let output = run_output("var a = 1;\nprint a = 5;\nprint a;");

        assert_eq!(output, "5\n5\n");
    }

    // ───────────────────── runtime type errors ─────────────────────

    #[test]
    fn division_by_zero_reports_operator_line() {
        let (_, error) = run_runtime_error("1 / 0;");

        assert_eq!(error, "Division by zero is not allowed.\n[line 1]");
    }

    #[test]
    fn operand_type_mismatches_are_runtime_errors() {
        let (_, error) = run_runtime_error("-\"x\";");
        assert!(error.contains("Operand must be a number."), "{error}");

        let (_, error) = run_runtime_error("print 1 < \"x\";");
        assert!(error.contains("Operands must be numbers."), "{error}");

        let (_, error) = run_runtime_error("print true + 1;");
        assert!(
            error.contains("Operands must be two numbers or two strings."),
            "{error}"
        );
    }

    #[test]
    fn undefined_variable_read_is_a_runtime_error() {
        let (_, error) = run_runtime_error("print missing;");

        assert!(error.contains("Undefined variable 'missing'."), "{error}");
    }

    #[test]
    fn output_before_a_runtime_error_is_kept() {
        let (output, error) = run_runtime_error("print 1;\nprint 2 / 0;");

        assert_eq!(output, "1\n");
        assert!(error.contains("[line 2]"), "{error}");
    }

    // ───────────────────── calls and functions ─────────────────────

    #[test]
    fn arity_mismatch_is_reported_before_the_body_runs() {
        let (output, error) = run_runtime_error(
            "fun two(a, b) {\n\
             \x20 print \"entered\";\n\
             \x20 return a;\n\
             }\n\
             two(1);",
        );

        assert_eq!(output, "");
        assert!(error.contains("Expected 2 arguments but got 1."), "{error}");
    }

    #[test]
    fn callee_is_checked_before_arguments_evaluate() {
        let (output, error) = run_runtime_error(
            "fun boom() {\n\
             \x20 print \"evaluated\";\n\
             \x20 return 1;\n\
             }\n\
             var notCallable = \"str\";\n\
             notCallable(boom());",
        );

        assert_eq!(output, "");
        assert!(
            error.contains("Can only call functions and classes."),
            "{error}"
        );
    }

    #[test]
    fn return_unwinds_nested_blocks_and_loops() {
        let output = run_output(
            "fun find() {\n\
             \x20 while (true) {\n\
             \x20   if (true) {\n\
             \x20     return \"done\";\n\
             \x20   }\n\
             \x20 }\n\
             }\n\
             print find();",
        );

        assert_eq!(output, "done\n");
    }

    #[test]
    fn lambda_expressions_are_first_class_values() {
        let output = run_output("var double = fun (n) { return n * 2; };\nprint double(21);");

        assert_eq!(output, "42\n");
    }

    #[test]
    fn function_without_return_yields_nil() {
        let output = run_output("fun noop() {}\nprint noop();");

        assert_eq!(output, "nil\n");
    }

    #[test]
    fn callables_have_readable_display_forms() {
        let output = run_output(
            "fun named() {}\n\
             var anon = fun () {};\n\
             print named;\n\
             print anon;\n\
             print clock;",
        );

        assert_eq!(output, "<fn named>\n<fn>\n<native fn clock>\n");
    }

    #[test]
    fn clock_native_returns_a_number() {
        let output = run_output("print clock() >= 0;");

        assert_eq!(output, "true\n");
    }

    // ───────────────────── control flow ────────────────────────────

    #[test]
    fn if_else_chain_takes_the_first_true_branch() {
        let output = run_output(
            "var n = 7;\n\
             if (n > 10) {\n\
             \x20 print \"big\";\n\
             } else if (n > 5) {\n\
             \x20 print \"medium\";\n\
             } else {\n\
             \x20 print \"small\";\n\
             }",
        );

        assert_eq!(output, "medium\n");
    }

    #[test]
    fn break_exits_the_loop() {
        let output = run_output(
            "for (var i = 0; i < 10; i = i + 1) {\n\
             \x20 if (i == 3) break;\n\
             \x20 print i;\n\
             }",
        );

        assert_eq!(output, "0\n1\n2\n");
    }

    #[test]
    fn continue_skips_to_the_next_iteration() {
        let output = run_output(
            "var i = 0;\n\
             while (i < 3) {\n\
             \x20 i = i + 1;\n\
             \x20 if (i == 2) continue;\n\
             \x20 print i;\n\
             }",
        );

        assert_eq!(output, "1\n3\n");
    }

    #[test]
    fn continue_skips_the_for_increment() {
        // bump runs once for the first iteration and is skipped by the
        // continue in the second.
        let output = run_output(
            "var bumps = 0;\n\
             fun bump(i) {\n\
             \x20 bumps = bumps + 1;\n\
             \x20 return i + 1;\n\
             }\n\
             for (var i = 0; i < 2; i = bump(i)) {\n\
             \x20 if (i == 1) {\n\
             \x20   i = 5;\n\
             \x20   continue;\n\
             \x20 }\n\
             }\n\
             print bumps;",
        );

        assert_eq!(output, "1\n");
    }

    // ───────────────────── classes and inheritance ─────────────────

    #[test]
    fn instance_fields_are_settable_and_readable() {
        let output = run_output(
            "class Box {}\nvar box = Box();\nbox.label = \"tools\";\nprint box.label;",
        );

        assert_eq!(output, "tools\n");
    }

    #[test]
    fn extracted_methods_stay_bound_to_their_instance() {
        let output = run_output(
            "class Person {\n\
             \x20 greet() {\n\
             \x20   return \"I am \" + this.name;\n\
             \x20 }\n\
             }\n\
             var person = Person();\n\
             person.name = \"Ada\";\n\
             var unbound = person.greet;\n\
             print unbound();",
        );

        assert_eq!(output, "I am Ada\n");
    }

    #[test]
    fn initializer_runs_on_construction_and_returns_the_instance() {
        let output = run_output(
            "class Point {\n\
             \x20 init(x, y) {\n\
             \x20   this.x = x;\n\
             \x20   this.y = y;\n\
             \x20 }\n\
             }\n\
             var p = Point(3, 4);\n\
             print p.x + p.y;\n\
             print p;\n\
             print p.init(1, 2);",
        );

        assert_eq!(output, "7\nPoint instance\nPoint instance\n");
    }

    #[test]
    fn bare_return_in_initializer_exits_early() {
        let output = run_output(
            "class Guard {\n\
             \x20 init(flag) {\n\
             \x20   this.state = \"early\";\n\
             \x20   if (flag) return;\n\
             \x20   this.state = \"late\";\n\
             \x20 }\n\
             }\n\
             print Guard(true).state;\n\
             print Guard(false).state;",
        );

        assert_eq!(output, "early\nlate\n");
    }

    #[test]
    fn methods_are_inherited_from_the_superclass() {
        let output = run_output(
            "class Animal {\n\
             \x20 speak() {\n\
             \x20   return \"generic noise\";\n\
             \x20 }\n\
             }\n\
             class Dog < Animal {}\n\
             print Dog().speak();",
        );

        assert_eq!(output, "generic noise\n");
    }

    #[test]
    fn super_invokes_the_overridden_method() {
        let output = run_output(
            "class Doughnut {\n\
             \x20 cook() {\n\
             \x20   print \"Fry until golden brown.\";\n\
             \x20 }\n\
             }\n\
             class BostonCream < Doughnut {\n\
             \x20 cook() {\n\
             \x20   super.cook();\n\
             \x20   print \"Pipe full of custard.\";\n\
             \x20 }\n\
             }\n\
             BostonCream().cook();",
        );

        assert_eq!(output, "Fry until golden brown.\nPipe full of custard.\n");
    }

    #[test]
    fn fields_are_shared_across_the_hierarchy() {
        let output = run_output(
            "class Base {\n\
             \x20 store(v) {\n\
             \x20   this.slot = v;\n\
             \x20 }\n\
             }\n\
             class Derived < Base {\n\
             \x20 read() {\n\
             \x20   return this.slot;\n\
             \x20 }\n\
             }\n\
             var d = Derived();\n\
             d.store(9);\n\
             print d.read();",
        );

        assert_eq!(output, "9\n");
    }

    #[test]
    fn superclass_value_must_be_a_class() {
        let (_, error) = run_runtime_error("var NotAClass = 1;\nclass Sub < NotAClass {}");

        assert!(error.contains("Superclass must be a class."), "{error}");
    }

    #[test]
    fn class_cannot_name_itself_as_superclass_at_global_scope() {
        // The name is only defined after its superclass clause evaluates.
        let (_, error) = run_runtime_error("class A < A {}");

        assert!(error.contains("Undefined variable 'A'."), "{error}");
    }

    #[test]
    fn static_methods_are_called_on_the_class() {
        let output = run_output(
            "class MathUtil {\n\
             \x20 static square(n) {\n\
             \x20   return n * n;\n\
             \x20 }\n\
             }\n\
             print MathUtil.square(3);\n\
             class Fancy < MathUtil {}\n\
             print Fancy.square(4);",
        );

        assert_eq!(output, "9\n16\n");
    }

    #[test]
    fn classes_carry_their_own_fields() {
        let output = run_output("class Config {}\nConfig.version = 2;\nprint Config.version;");

        assert_eq!(output, "2\n");
    }

    #[test]
    fn missing_static_property_is_a_runtime_error() {
        let (_, error) = run_runtime_error("class M {}\nM.missing();");

        assert!(
            error.contains("Undefined static property 'missing'."),
            "{error}"
        );
    }

    #[test]
    fn property_access_requires_an_instance_or_class() {
        let (_, error) = run_runtime_error("print 123.x;");
        assert!(error.contains("Only instances have properties."), "{error}");

        let (_, error) = run_runtime_error("\"s\".x = 1;");
        assert!(error.contains("Only instances have fields."), "{error}");
    }

    #[test]
    fn missing_property_is_a_runtime_error() {
        let (_, error) = run_runtime_error("class Empty {}\nEmpty().missing;");

        assert!(error.contains("Undefined property 'missing'."), "{error}");
    }

    #[test]
    fn set_evaluates_object_before_value() {
        let output = run_output(
            "class Box {}\n\
             var theBox = Box();\n\
             fun getBox() {\n\
             \x20 print \"box\";\n\
             \x20 return theBox;\n\
             }\n\
             fun getVal() {\n\
             \x20 print \"val\";\n\
             \x20 return 7;\n\
             }\n\
             getBox().field = getVal();\n\
             print theBox.field;",
        );

        assert_eq!(output, "box\nval\n7\n");
    }

    #[test]
    fn this_inside_a_static_method_fails_at_runtime() {
        let (_, error) = run_runtime_error(
            "class Foo {\n\
             \x20 static s() {\n\
             \x20   return this;\n\
             \x20 }\n\
             }\n\
             Foo.s();",
        );

        assert!(error.contains("Undefined variable 'this'."), "{error}");
    }

    // ───────────────────── session semantics ───────────────────────

    #[test]
    fn expression_only_programs_yield_their_last_value() {
        assert_eq!(run_value("1 + 2;"), Some("3".to_string()));
        assert_eq!(run_value("1; 2 * 3;"), Some("6".to_string()));
        assert_eq!(run_value("nil;"), Some("nil".to_string()));
    }

    #[test]
    fn non_expression_statements_clear_the_session_value() {
        assert_eq!(run_value("var x = 1; x + 1;"), None);
        assert_eq!(run_value("print 1;"), None);
    }

    #[test]
    fn one_interpreter_carries_state_across_programs() {
        let sink = SharedOutput::default();
        let mut interpreter: Interpreter<'static> =
            Interpreter::with_output(Box::new(sink.clone()));

        let setup = parse_source(
            "var total = 0;\n\
             fun add(n) {\n\
             \x20 total = total + n;\n\
             \x20 return total;\n\
             }",
        );

        {
            let mut resolver = Resolver::new(&mut interpreter);
            resolver.resolve(&setup).expect("setup should resolve");
        }

        assert_eq!(
            interpreter
                .interpret(&setup)
                .expect("setup should run")
                .map(|v| v.to_string()),
            None
        );

        let calls = parse_source("add(1); add(2);");

        {
            let mut resolver = Resolver::new(&mut interpreter);
            resolver.resolve(&calls).expect("calls should resolve");
        }

        assert_eq!(
            interpreter
                .interpret(&calls)
                .expect("calls should run")
                .map(|v| v.to_string()),
            Some("3".to_string())
        );
    }
}
