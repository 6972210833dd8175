//! Whole programs, read and compiled from source and run on a booted VM.

use std::fs;

use crate::compiler::Compiler;
use crate::error::{CompileError, Error, Result};
use crate::repl;
use crate::vm::{Vm, MAX_CALL_DEPTH};

fn run(source: &str) -> Result<(Option<String>, String)> {
    let mut vm = Vm::boot(Vec::new())?;
    let mut compiler = Compiler::new();
    let result = repl::eval(&mut vm, &mut compiler, source, false)?;
    let output = String::from_utf8_lossy(&vm.into_output()).into_owned();
    Ok((result, output))
}

fn value(source: &str) -> String {
    match run(source) {
        Ok((Some(result), _)) => result,
        Ok((None, _)) => panic!("{} left no value", source),
        Err(err) => panic!("{} failed: {}", source, err),
    }
}

fn output(source: &str) -> String {
    run(source).unwrap().1
}

#[test]
fn recursive_fib() {
    let source = "
        (define fib
          (lambda (n)
            (if (< n 2)
                n
                (+ (fib (- n 1))
                   (fib (- n 2))))))
        (write (fib 8))";
    assert_eq!(output(source), "21");
}

#[test]
fn iterative_fib_with_an_inner_definition() {
    let source = "
        (define fib
          (lambda (n)
            (define f
              (lambda (i c n)
                (if (= i 0)
                    c
                    (f (- i 1) n (+ c n)))))
            (f n 0 1)))
        (write (fib 8))";
    assert_eq!(output(source), "21");
}

#[test]
fn big_integers_do_not_overflow() {
    let source = "
        (define double (lambda (n k) (if (= k 0) n (double (+ n n) (- k 1)))))
        (double 1 100)";
    assert_eq!(value(source), "1267650600228229401496703205376");
}

#[test]
fn callee_sees_the_bindings_of_live_callers() {
    assert_eq!(value("((lambda (n) ((lambda (x) (+ x n)) 1)) 2)"), "3");
}

#[test]
fn returned_functions_lose_their_defining_frame() {
    let source = "
        (define make-adder (lambda (n) (lambda (x) (+ x n))))
        ((make-adder 2) 1)";
    assert!(matches!(run(source), Err(Error::UndefinedVariable(name)) if name == "n"));
}

#[test]
fn unbounded_recursion_hits_the_depth_limit() {
    let mut vm = Vm::boot(Vec::new()).unwrap();
    let mut compiler = Compiler::new();
    let result = repl::eval(
        &mut vm,
        &mut compiler,
        "(define down (lambda (n) (+ 1 (down n)))) (down 0)",
        false,
    );
    assert!(matches!(result, Err(Error::CallStackTooDeep)));
    assert_eq!(vm.frames().len(), MAX_CALL_DEPTH);
}

#[test]
fn apply_spreads_its_last_argument() {
    assert_eq!(value("(apply (lambda (a b) (+ a b)) (list 1 2))"), "3");
    assert_eq!(
        value("(apply (lambda (a b c) (list a b c)) 1 '(2 3))"),
        "(1 2 3)"
    );
    assert_eq!(value("(apply (lambda args args) '())"), "()");
    assert!(matches!(
        run("(apply (lambda (a) a) 5)"),
        Err(Error::WrongType { expected: "list", .. })
    ));
}

#[test]
fn rest_parameters_collect_remaining_arguments() {
    assert_eq!(value("((lambda (a . rest) rest) 1 2 3)"), "(2 3)");
    assert_eq!(value("(define (f . all) all) (f 1 2)"), "(1 2)");
}

#[test]
fn pairs_and_lists() {
    assert_eq!(value("(cons 1 2)"), "(1 . 2)");
    assert_eq!(value("(cons 1 '(2 3))"), "(1 2 3)");
    assert_eq!(value("(cons 1 '())"), "(1)");
    assert_eq!(value("(append '(1 2) '(3) '())"), "(1 2 3)");
    assert_eq!(value("(car (cdr '(a b c)))"), "b");
    assert_eq!(value("'(1 (2 \"s\") . x)"), "(1 (2 s) . x)");
}

#[test]
fn equality() {
    assert_eq!(value("(eq? '(1) '(1))"), "#f");
    assert_eq!(value("(equal? '(1 (2)) '(1 (2)))"), "#t");
    assert_eq!(value("(eq? 'a 'a)"), "#t");
    assert_eq!(value("(= 3 3)"), "#t");
    assert_eq!(value("(define l '(1)) (eq? l l)"), "#t");
}

#[test]
fn macros_expand_before_compilation() {
    let source = "
        (define-syntax my-if
          (syntax-rules ()
            ((_ c a b) (if c a b))))
        (my-if #f 1 2)";
    assert_eq!(value(source), "2");
}

#[test]
fn macros_with_rest_patterns() {
    let source = "
        (define-syntax my-list
          (syntax-rules ()
            ((_) '())
            ((_ x . rest) (cons x (my-list . rest)))))
        (my-list 1 2 3)";
    assert_eq!(value(source), "(1 2 3)");
}

#[test]
fn macros_are_visible_inside_lambdas() {
    let source = "
        (define-syntax inc
          (syntax-rules ()
            ((_ x) (+ x 1))))
        (define f (lambda (n) (inc n)))
        (f 4)";
    assert_eq!(value(source), "5");
}

#[test]
fn quasiquote_splices_and_unquotes() {
    assert_eq!(value("(define y 2) `(1 ,@(list y 3) 4)"), "(1 2 3 4)");
    assert_eq!(value("`(1 ,@'(a b))"), "(1 a b)");
    assert_eq!(value("(define y 5) `(a ,y (b ,(+ y 1)))"), "(a 5 (b 6))");
    for source in ["`(1 ,@2)", "(define xs '(2 3)) `(1 ,@xs)"] {
        assert!(matches!(
            run(source),
            Err(Error::Compile(CompileError::SpliceNotList))
        ));
    }
}

#[test]
fn set_updates_the_nearest_binding() {
    assert_eq!(value("(define x 1) (set! x 2) x"), "2");
    let source = "
        (define counter 0)
        (define bump (lambda () (set! counter (+ counter 1))))
        (bump)
        (bump)
        counter";
    assert_eq!(value(source), "2");
    assert!(matches!(
        run("(set! nowhere 1)"),
        Err(Error::UndefinedVariable(name)) if name == "nowhere"
    ));
}

#[test]
fn halt_and_resume() {
    let mut vm = Vm::boot(Vec::new()).unwrap();
    let mut compiler = Compiler::new();
    let source = "
        (define f (lambda () (halt) (write 5)))
        (write 1)
        (f)
        (write 2)";
    repl::eval(&mut vm, &mut compiler, source, false).unwrap();
    assert_eq!(vm.output(), b"1");
    assert_eq!(vm.frames().len(), 2);

    vm.resume().unwrap();
    assert_eq!(vm.output(), b"152");
    assert_eq!(vm.frames().len(), 1);
}

#[test]
fn procedures_are_a_type_of_their_own() {
    assert_eq!(value("(null? (lambda (x) x))"), "#f");
    assert_eq!(value("(pair? (lambda (x) x))"), "#f");
    assert_eq!(value("(= (lambda () 1) 1)"), "#f");
    assert_eq!(value("(list? map)"), "#f");
    assert_eq!(value("(equal? car car)"), "#t");
    assert!(matches!(
        run("(car (lambda () 1))"),
        Err(Error::WrongType { expected: "pair", found: "procedure" })
    ));
    assert!(matches!(
        run("(+ (lambda () 1) 1)"),
        Err(Error::WrongType { expected: "integer", found: "procedure" })
    ));
}

#[test]
fn tab_characters_survive_reading_and_macros() {
    assert_eq!(output("(write #\\\t)"), "\t");
    assert_eq!(output("(write #\\tab)"), "\t");
    let source = "
        (define-syntax id (syntax-rules () ((_ x) x)))
        (write (id #\\tab) (id #\\\t))";
    assert_eq!(output(source), "\t\t");
}

#[test]
fn write_renders_every_argument() {
    assert_eq!(output("(write \"a\" 1 #\\b '(1 \"s\") #t)"), "a1b(1 s)#t");
}

#[test]
fn strings() {
    assert_eq!(value("(string-length \"héllo\")"), "5");
    assert_eq!(value("(string-ref \"héllo\" 1)"), "é");
    assert_eq!(value("(list->string (list #\\a #\\b))"), "ab");
    assert!(matches!(
        run("(string-ref \"abc\" 3)"),
        Err(Error::IndexOutOfBounds { index: 3, len: 3 })
    ));
}

#[test]
fn include_runs_another_file_inline() {
    let dir = tempfile::tempdir().unwrap();
    let lib = dir.path().join("lib.scm");
    fs::write(&lib, "(define included 42) (write \"x\")").unwrap();
    let path = format!("{:?}", lib.display().to_string());

    let (result, out) = run(&format!("(include {}) (include {}) included", path, path)).unwrap();
    assert_eq!(result.as_deref(), Some("42"));
    assert_eq!(out, "xx");

    let missing = format!("{:?}", dir.path().join("missing.scm").display().to_string());
    assert!(matches!(
        run(&format!("(include {})", missing)),
        Err(Error::Io(_))
    ));
}

#[test]
fn a_file_including_itself_hits_the_depth_limit() {
    let dir = tempfile::tempdir().unwrap();
    let lib = dir.path().join("self.scm");
    let path = format!("{:?}", lib.display().to_string());
    fs::write(&lib, format!("(include {})", path)).unwrap();

    let mut vm = Vm::boot(Vec::new()).unwrap();
    let mut compiler = Compiler::new();
    let result = repl::eval(&mut vm, &mut compiler, &format!("(include {})", path), false);
    assert!(matches!(result, Err(Error::CallStackTooDeep)));
    assert_eq!(vm.includes.len(), MAX_CALL_DEPTH);
    vm.reset();
    assert_eq!(
        repl::eval(&mut vm, &mut compiler, "(+ 1 2)", false).unwrap().as_deref(),
        Some("3")
    );
}

#[test]
fn halt_inside_an_included_file_suspends_the_program() {
    let dir = tempfile::tempdir().unwrap();
    let lib = dir.path().join("pause.scm");
    fs::write(&lib, "(write 1) (halt) (write 2)").unwrap();
    let source = format!("(include {:?}) (write 3)", lib.display().to_string());

    let mut vm = Vm::boot(Vec::new()).unwrap();
    let mut compiler = Compiler::new();
    repl::eval(&mut vm, &mut compiler, &source, false).unwrap();
    assert_eq!(vm.output(), b"1");
    assert_eq!(vm.includes.len(), 1);

    vm.resume().unwrap();
    assert_eq!(vm.output(), b"123");
    assert!(vm.includes.is_empty());
}

#[test]
fn including_an_empty_file_yields_the_empty_list() {
    let dir = tempfile::tempdir().unwrap();
    let lib = dir.path().join("empty.scm");
    fs::write(&lib, "; nothing here\n").unwrap();
    assert_eq!(value(&format!("(include {:?})", lib.display().to_string())), "()");
}

#[test]
fn included_macros_stay_in_the_included_file() {
    let dir = tempfile::tempdir().unwrap();
    let lib = dir.path().join("macros.scm");
    fs::write(&lib, "(define-syntax one (syntax-rules () ((_) 1)))").unwrap();
    let source = format!("(include {:?}) (one)", lib.display().to_string());
    // `one` is unknown to the including compiler, so this is a plain call
    assert!(matches!(
        run(&source),
        Err(Error::UndefinedVariable(name)) if name == "one"
    ));
}

#[test]
fn prelude_list_functions() {
    assert_eq!(value("(map (lambda (x) (+ x 1)) '(1 2 3))"), "(2 3 4)");
    assert_eq!(value("(filter (lambda (x) (> x 2)) '(1 2 3 4))"), "(3 4)");
    assert_eq!(value("(reverse '(1 2 3))"), "(3 2 1)");
    assert_eq!(value("(length '(a b c))"), "3");
    assert_eq!(value("(list? '(1 2))"), "#t");
    assert_eq!(value("(list? (cons 1 2))"), "#f");
    assert_eq!(value("(not #f)"), "#t");
    assert_eq!(value("(foldl (lambda (acc x) (+ acc x)) 0 '(1 2 3))"), "6");
    assert_eq!(value("(list-ref '(a b c) 2)"), "c");
    assert_eq!(value("(assq 'b '((a 1) (b 2)))"), "(b 2)");
    assert_eq!(output("(for-each (lambda (x) (write x)) '(1 2 3))"), "123");
}

#[test]
fn compile_errors_surface_before_running() {
    assert!(matches!(run("(define)"), Err(Error::Compile(_))));
    assert!(matches!(run("(cons 1)"), Err(Error::Compile(_))));
    assert!(matches!(run("(1 2"), Err(Error::Incomplete(_))));
}
