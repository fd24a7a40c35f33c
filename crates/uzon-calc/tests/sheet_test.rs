use std::path::Path;

use pretty_assertions::assert_eq;
use uzon_calc::{Config, Context, RunError, RunOptions, run_source};

/// Runs `body` as the entry function of a script named `name`.
fn run(name: &str, body: &str, config: &Config) -> Result<Context, RunError> {
    let mut source = String::from("from uzoncalc import *\n\n@uzon_calc()\nasync def sheet(ctx):\n");
    for line in body.lines() {
        source.push_str("    ");
        source.push_str(line);
        source.push('\n');
    }
    run_source(
        Path::new(&format!("{name}.py")),
        source.into(),
        config,
        RunOptions::default(),
    )
}

fn sheet(name: &str, body: &str) -> Vec<String> {
    run(name, body, &Config::default())
        .unwrap()
        .contents()
        .to_vec()
}

#[test]
fn assignment_shows_symbols_substitution_and_result() {
    let blocks = sheet("s1", "a = 1 + 2");
    assert_eq!(blocks.len(), 1);
    assert!(blocks[0].contains(
        "<mi>a</mi></mrow><mo>=</mo><mrow><mn>1</mn><mo>+</mo><mn>2</mn></mrow><mo>=</mo><mrow><mn>3</mn></mrow>"
    ));
}

#[test]
fn fractions_substitute_their_variables() {
    let blocks = sheet("s2", "x = 6\na = 1\nb = 2\ny = x / (a + b)");
    let block = blocks.last().unwrap();
    assert!(block.contains("<mfrac>"), "{block}");
    assert!(block.contains("<mi>x</mi>"), "{block}");
    assert!(block.contains("<mn>6</mn>"), "{block}");
    assert!(block.ends_with("<mn>2</mn></mrow></mrow></math></p>"), "{block}");
}

#[test]
fn unit_expressions_fold() {
    let blocks = sheet("s3", "length = 10 * unit.meter");
    let block = &blocks[0];
    assert!(block.contains(
        r#"<mn>10</mn><mo></mo><mtext class="unit" mathvariant="normal">meter</mtext>"#
    ));
    // The value repeats the right-hand side and is left out.
    assert_eq!(block.matches(r#"class="unit""#).count(), 1, "{block}");

    let blocks = sheet("s4", "speed = 10 * unit.m / unit.second ** 2");
    assert!(blocks[0].contains(">meter / second ** 2</mtext>"), "{}", blocks[0]);
}

#[test]
fn bare_strings_are_paragraphs() {
    let blocks = sheet("s5", "fck = 30\n'concrete strength C30'");
    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[1], "<p>concrete strength C30</p>");
}

#[test]
fn docstrings_are_not_recorded() {
    let blocks = sheet("docstring", "'Design notes for the beam'\nfck = 30");
    assert_eq!(blocks.len(), 1);
    assert!(!blocks[0].contains("Design notes"), "{}", blocks[0]);
    assert!(blocks[0].contains("<mi>fck</mi>"), "{}", blocks[0]);
}

#[test]
fn fstring_slots() {
    let blocks = sheet("s6", "value = 3.1415926\nf'value is {value:.3f}'");
    let block = blocks.last().unwrap();
    assert!(block.starts_with("<p>value is <math"), "{block}");
    assert!(block.contains("<mi>value</mi>"), "{block}");
    assert!(block.contains("<mn>3.142</mn>"), "{block}");

    let config = Config {
        enable_fstring_equation: false,
        ..Config::default()
    };
    let ctx = run(
        "s6-plain",
        "value = 3.1415926\nf'value is {value:.3f}'",
        &config,
    )
    .unwrap();
    assert_eq!(ctx.contents().last().unwrap(), "<p>value is 3.142</p>");
}

#[test]
fn aliases_apply_until_removed() {
    let blocks = sheet(
        "s7",
        "alias('speed_car', 'speed_auto')\nspeed_car = 3\nalias('speed_car', None)\nspeed_car = 4",
    );
    assert_eq!(blocks.len(), 2);
    assert!(blocks[0].contains("auto") && !blocks[0].contains("car"), "{}", blocks[0]);
    assert!(blocks[1].contains("car") && !blocks[1].contains("auto"), "{}", blocks[1]);
}

#[test]
fn hide_is_scoped_to_its_block() {
    let blocks = sheet("s8", "if True:\n    a = 1\n    hide()\n    b = 2\nc = 3");
    assert_eq!(blocks.len(), 2);
    assert!(blocks[0].contains("<mi>a</mi>"));
    assert!(blocks[1].contains("<mi>c</mi>"));
}

#[test]
fn array_subscripts() {
    let blocks = sheet(
        "s9",
        "arr = [[1, 2, 3], [4, 5, 6]]\nx = arr[0, 1]\ncol = arr[:, 1]",
    );
    assert_eq!(blocks.len(), 3);
    assert!(blocks[1].contains("<mn>2</mn>"), "{}", blocks[1]);
    assert!(blocks[2].contains("<mo>:</mo>"), "{}", blocks[2]);
}

#[test]
fn private_assignments_are_suppressed() {
    assert!(sheet("private", "_tmp = 4").is_empty());

    let config = Config {
        suppress_private_assignments: false,
        ..Config::default()
    };
    let ctx = run("private-shown", "_tmp = 4", &config).unwrap();
    assert_eq!(ctx.contents().len(), 1);
}

#[test]
fn show_restores_recording() {
    let blocks = sheet("show", "hide()\na = 1\nshow()\nb = 2");
    assert_eq!(blocks.len(), 1);
    assert!(blocks[0].contains("<mi>b</mi>"));
}

#[test]
fn inline_groups_share_a_paragraph() {
    let blocks = sheet("inline", "inline(', ')\na = 1\nb = 2\nendline()\nc = 3");
    assert_eq!(blocks.len(), 2);
    assert!(blocks[0].starts_with("<p><span><math"), "{}", blocks[0]);
    assert!(blocks[0].contains("</span>, <span>"), "{}", blocks[0]);
}

#[test]
fn substitution_can_be_disabled() {
    let blocks = sheet("substitution", "x = 2\ndisable_substitution()\ny = x + 1");
    let block = blocks.last().unwrap();
    assert!(block.contains("<mi>x</mi>"), "{block}");
    assert!(!block.contains("<mn>2</mn>"), "{block}");
    assert!(block.contains("<mn>3</mn>"), "{block}");
}

#[test]
fn element_helpers_append_html() {
    let blocks = sheet(
        "elements",
        "H2('Loads')\nP('dead load', classes='note')\nBr()",
    );
    assert_eq!(
        blocks,
        ["<h2>Loads</h2>", "<p class=\"note\">dead load</p>", "<br />"]
    );
}

#[test]
fn greek_names_become_glyphs() {
    let blocks = sheet("greek", "alpha = 2");
    assert!(blocks[0].contains("<mi>α</mi>"), "{}", blocks[0]);
}

#[test]
fn silent_ui_uses_defaults() {
    let source = "\
from uzoncalc import *

@uzon_calc()
async def sheet(ctx):
    inputs = UI('Section', [Field('b', 'Width', FieldType.number, default=100)])
    b = inputs.b
";
    let options = RunOptions {
        defaults: serde_json::from_str(r#"{"Section": {"b": 300}}"#).unwrap(),
        ..RunOptions::default()
    };
    let ctx = run_source(
        Path::new("silent-ui.py"),
        source.into(),
        &Config::default(),
        options,
    )
    .unwrap();
    assert_eq!(ctx.ui_windows.len(), 1);
    assert_eq!(ctx.ui_windows[0].title, "Section");
    // Block 0 records `inputs = UI(...)` itself.
    assert_eq!(ctx.contents().len(), 2);
    assert!(ctx.contents()[0].contains("<mi>inputs</mi>"), "{}", ctx.contents()[0]);
    assert!(ctx.contents()[1].contains("<mn>300</mn>"), "{}", ctx.contents()[1]);
}

#[test]
fn saved_sheets_land_next_to_the_script() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("beam.py");
    std::fs::write(
        &path,
        "\
from uzoncalc import *

@uzon_calc('Beam')
async def sheet(ctx):
    doc_title('Beam check')
    span = 6
    save()
",
    )
    .unwrap();
    let ctx = uzon_calc::run_script(&path, &Config::default(), RunOptions::default()).unwrap();
    assert_eq!(ctx.doc.title.as_deref(), Some("Beam check"));
    let html = std::fs::read_to_string(dir.path().join("Beam check.html")).unwrap();
    assert!(html.contains("<title>Beam check</title>"));
    assert!(html.contains("<mi>span</mi>"));
}

#[test]
fn json_cache_persists_between_runs() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.py");
    std::fs::write(
        &path,
        "\
from uzoncalc import *

@uzon_calc()
async def sheet(ctx):
    runs = db_get('runs', 0) + 1
    db_set('runs', runs)
",
    )
    .unwrap();
    for _ in 0..2 {
        uzon_calc::run_script(&path, &Config::default(), RunOptions::default()).unwrap();
    }
    let db = std::fs::read_to_string(dir.path().join("data").join("db.json")).unwrap();
    let db: serde_json::Value = serde_json::from_str(&db).unwrap();
    assert_eq!(db["runs"], serde_json::json!(2));
}
