use pretty_assertions::assert_eq;

use super::*;
use crate::context::ContextOptions;
use crate::error::ScriptError;
use crate::syntax::parse_module;

fn exec(source: &str) -> Result<Interpreter, ScriptError> {
    let body = parse_module(source).unwrap();
    let mut interp = Interpreter::new(Context::for_tests(), "test.py");
    interp
        .exec_module(&body)
        .map_err(Exc::into_script_error)?;
    Ok(interp)
}

fn global(interp: &Interpreter, name: &str) -> String {
    interp.globals().borrow()[name].repr()
}

fn eval_global(source: &str, name: &str) -> String {
    let interp = exec(source).unwrap();
    global(&interp, name)
}

#[test]
fn closures_see_their_defining_scope() {
    let source = "\
def make(n):
    def add(x):
        return x + n
    return add

r = make(3)(4)

def counter():
    count = 0
    def bump():
        nonlocal count
        count += 1
        return count
    bump()
    return bump()

c = counter()
";
    let interp = exec(source).unwrap();
    assert_eq!(global(&interp, "r"), "7");
    assert_eq!(global(&interp, "c"), "2");
}

#[test]
fn arguments_bind_like_python() {
    let source = "\
def f(a, b=2, *rest, scale=1, **extra):
    return [a, b, list(rest), scale, extra]

x = f(1)
y = f(1, 3, 4, 5, scale=10, unit='m')
z = f(*[7, 8], **{'scale': 0})
";
    let interp = exec(source).unwrap();
    assert_eq!(global(&interp, "x"), "[1, 2, [], 1, {}]");
    assert_eq!(global(&interp, "y"), "[1, 3, [4, 5], 10, {'unit': 'm'}]");
    assert_eq!(global(&interp, "z"), "[7, 8, [], 0, {}]");

    let err = exec("def f(a):\n    return a\nf()\n").unwrap_err();
    assert_eq!(err.kind(), "TypeError");
    assert_eq!(err.line(), Some(3));
}

#[test]
fn exceptions_are_caught_by_base_class() {
    let source = "\
class CheckFailed(ValueError):
    pass

log = []
try:
    try:
        1 / 0
    except ArithmeticError as err:
        log.append(str(err))
        raise CheckFailed('beam too slender')
    finally:
        log.append('cleanup')
except ValueError as err:
    log.append(str(err))
else:
    log.append('unreachable')
";
    assert_eq!(
        eval_global(source, "log"),
        "['division by zero', 'cleanup', 'beam too slender']"
    );
}

#[test]
fn uncaught_errors_carry_their_line() {
    let err = exec("x = 1\ny = x / 0\n").unwrap_err();
    assert_eq!(err.kind(), "ZeroDivisionError");
    assert_eq!(err.line(), Some(2));

    let err = exec("def f(n):\n    return f(n + 1)\nf(0)\n").unwrap_err();
    assert_eq!(err.kind(), "RecursionError");

    let err = exec("import numpy as np\n").unwrap_err();
    assert_eq!(err.kind(), "ModuleNotFoundError");
}

#[test]
fn comprehensions_and_unpacking() {
    let source = "\
first, *middle, last = range(5)
squares = {n: n * n for n in range(4) if n % 2 == 0}
pairs = [(a, b) for a in 'ab' for b in (1, 2)]
total = sum(x * 2 for x in [1, 2, 3])
";
    let interp = exec(source).unwrap();
    assert_eq!(global(&interp, "first"), "0");
    assert_eq!(global(&interp, "middle"), "[1, 2, 3]");
    assert_eq!(global(&interp, "last"), "4");
    assert_eq!(global(&interp, "squares"), "{0: 0, 2: 4}");
    assert_eq!(
        global(&interp, "pairs"),
        "[('a', 1), ('a', 2), ('b', 1), ('b', 2)]"
    );
    assert_eq!(global(&interp, "total"), "12");
    assert!(!interp.globals().borrow().contains_key("n"));
}

#[test]
fn match_statements() {
    let source = "\
def grade(value):
    match value:
        case 0 | 1:
            return 'low'
        case [x, *_] if x > 10:
            return 'list starting high'
        case [_, *rest]:
            return f'list of {len(rest) + 1}'
        case _:
            return 'other'

out = [grade(1), grade([20, 1]), grade([1, 2, 3]), grade('x')]
";
    assert_eq!(
        eval_global(source, "out"),
        "['low', 'list starting high', 'list of 3', 'other']"
    );
}

#[test]
fn formatting_and_builtins() {
    let source = "\
x = 3.14159
s = f'{x:.2f} / {x!r} / {{literal}}'
t = '{} + {name}'.format(1, name='b')
r = sorted(['bb', 'a', 'ccc'], key=len, reverse=True)
m = max([3, 9, 2])
k = round(2.5)
"
    ;
    let interp = exec(source).unwrap();
    assert_eq!(global(&interp, "s"), "'3.14 / 3.14159 / {literal}'");
    assert_eq!(global(&interp, "t"), "'1 + b'");
    assert_eq!(global(&interp, "r"), "['ccc', 'bb', 'a']");
    assert_eq!(global(&interp, "m"), "9");
    assert_eq!(global(&interp, "k"), "2");
}

#[test]
fn builtin_functions() {
    let source = "\
import math

class Beam:
    pass

kinds = [isinstance(True, int), isinstance(1.5, (int, str)), isinstance(Beam(), Beam)]
shown = repr([1, 'a']) == \"[1, 'a']\"
formatted = [format(3.14159, '.2f'), format(42)]
evens = filter(lambda n: n % 2 == 0, range(6))
truthy = filter(None, [0, 1, '', 'x'])
powers = [pow(2, 10), pow(2.0, -1)]
qr = divmod(7, 2)
has = [hasattr('s', 'upper'), hasattr('s', 'nope')]
swapped = 'a-b-c'.replace('-', '+')
items = [1, 3]
items.insert(1, 2)
angle = math.isclose(math.atan2(1, 1) * 4, math.pi)
big = math.pow(2, 10)
close = math.isclose(1.0, 1.0 + 1e-12)
";
    let interp = exec(source).unwrap();
    assert_eq!(global(&interp, "kinds"), "[True, False, True]");
    assert_eq!(global(&interp, "shown"), "True");
    assert_eq!(global(&interp, "formatted"), "['3.14', '42']");
    assert_eq!(global(&interp, "evens"), "[0, 2, 4]");
    assert_eq!(global(&interp, "truthy"), "[1, 'x']");
    assert_eq!(global(&interp, "powers"), "[1024, 0.5]");
    assert_eq!(global(&interp, "qr"), "(3, 1)");
    assert_eq!(global(&interp, "has"), "[True, False]");
    assert_eq!(global(&interp, "swapped"), "'a+b+c'");
    assert_eq!(global(&interp, "items"), "[1, 2, 3]");
    assert_eq!(global(&interp, "angle"), "True");
    assert_eq!(global(&interp, "big"), "1024.0");
    assert_eq!(global(&interp, "close"), "True");

    let err = exec("isinstance(1)\n").unwrap_err();
    assert_eq!(err.kind(), "TypeError");
    let err = exec("isinstance(1, 2)\n").unwrap_err();
    assert_eq!(err.kind(), "TypeError");
}

#[test]
fn main_blocks_do_not_run() {
    let source = "\
ran = False
if __name__ == '__main__':
    ran = True
";
    assert_eq!(eval_global(source, "ran"), "False");
}

#[test]
fn entry_points_must_be_async() {
    let source = "\
from uzoncalc import *

@uzon_calc()
def sheet(ctx):
    pass
";
    let err = exec(source).unwrap_err();
    assert_eq!(err.kind(), "TypeError");
    assert!(err.to_string().contains("Function sheet must be async"));

    let interp = exec("from uzoncalc import *\n\n@uzon_calc('Beam')\nasync def sheet(ctx):\n    pass\n")
        .unwrap();
    let entry = interp.entry().unwrap();
    assert_eq!(entry.display_name(), "Beam");
    assert_eq!(entry.def.line, 4);
}

#[test]
fn quantities_from_the_unit_registry() {
    let source = "\
from uzoncalc import unit

span = 6 * unit.m
mm = span.to('mm').magnitude
area = (span * 2 * unit.m).to_base_units()
same = span == 6000 * unit.mm
";
    let interp = exec(source).unwrap();
    assert_eq!(global(&interp, "mm"), "6000.0");
    assert_eq!(global(&interp, "same"), "True");

    let err = exec("from uzoncalc import unit\nx = 1 * unit.m + 1 * unit.s\n").unwrap_err();
    assert_eq!(err.kind(), "DimensionalityError");
}

#[test]
fn directives_change_the_context() {
    let source = "\
from uzoncalc import *
hide()
alias('speed_car', 'v')
disable_substitution()
";
    let interp = exec(source).unwrap();
    let options = interp.ctx.options();
    assert!(options.contains(ContextOptions::SKIP_CONTENT));
    assert!(!options.contains(ContextOptions::ENABLE_SUBSTITUTION));
    assert_eq!(
        interp.ctx.aliases().get("speed_car"),
        Some(&Some("v".to_string()))
    );
}

#[test]
fn capitalized_helpers_append_blocks() {
    let source = "\
from uzoncalc import *
H1('Beam')
html = p('kept out', classes='note')
P(['a', 'b'], props=props(id='x'))
";
    let interp = exec(source).unwrap();
    assert_eq!(global(&interp, "html"), "'<p class=\"note\">kept out</p>'");
    assert_eq!(
        interp.ctx.contents(),
        ["<h1>Beam</h1>", "<p id=\"x\">ab</p>"]
    );
}

#[test]
fn silent_ui_returns_defaults() {
    let source = "\
from uzoncalc import *
fields = [Field('b', 'Width', FieldType.number, default=300), Field('grade', 'Grade')]
inputs = UI('Section', fields)
width = inputs.b
";
    let interp = exec(source).unwrap();
    assert_eq!(global(&interp, "width"), "300");
    assert_eq!(interp.ctx.ui_windows.len(), 1);
    assert_eq!(interp.ctx.ui_windows[0].fields[1].kind.as_str(), "text");
}
