//! The `uzoncalc` module seen by scripts.

use std::cell::RefCell;
use std::rc::Rc;
use std::str::FromStr;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value as Json;

use super::builtins::{bind, builtin, hide, show};
use super::error::{Exc, OpError};
use super::value::{Args, BuiltinFn, Entry, Function, FunctionBody, Key, Module, Value};
use super::Interpreter;
use crate::context::ContextOptions;
use crate::doc;
use crate::elements::{self, ImageOptions, Props};
use crate::interaction::{Field, FieldType, InteractionError, Window, request_inputs};

const FUNCTIONS: &[(&str, BuiltinFn)] = &[
    ("uzon_calc", uzon_calc),
    ("run", run),
    ("run_sync", run),
    ("UI", ui),
    ("Field", field),
    ("hide", hide),
    ("show", show),
    ("inline", inline),
    ("endline", endline),
    ("enable_substitution", enable_substitution),
    ("disable_substitution", disable_substitution),
    ("enable_fstring_equation", enable_fstring_equation),
    ("disable_fstring_equation", disable_fstring_equation),
    ("alias", alias),
    ("doc_title", doc_title),
    ("page_size", page_size),
    ("font_family", font_family),
    ("style", style),
    ("toc", toc),
    ("save", save),
    ("db_get", db_get),
    ("db_set", db_set),
    ("props", props),
    ("h", h),
    ("h1", h1),
    ("h2", h2),
    ("h3", h3),
    ("h4", h4),
    ("h5", h5),
    ("h6", h6),
    ("p", p),
    ("div", div),
    ("span", span),
    ("row", row),
    ("br", br),
    ("table", table),
    ("th", th),
    ("tr", tr),
    ("td", td),
    ("code", code),
    ("info", info),
    ("latex", latex),
    ("img", img),
    ("plot", plot),
    ("H1", persist_h1),
    ("H2", persist_h2),
    ("H3", persist_h3),
    ("H4", persist_h4),
    ("H5", persist_h5),
    ("H6", persist_h6),
    ("P", persist_p),
    ("Div", persist_div),
    ("Span", persist_span),
    ("Row", persist_row),
    ("Br", persist_br),
    ("Table", persist_table),
    ("Code", persist_code),
    ("Info", persist_info),
    ("Img", persist_img),
    ("Plot", persist_plot),
];

pub(super) fn module() -> Module {
    let mut attrs: IndexMap<&'static str, Value> = IndexMap::new();
    for (name, func) in FUNCTIONS {
        attrs.insert(name, builtin(name, *func));
    }
    attrs.insert("unit", Value::UnitRegistry);
    let field_types = FieldType::ALL
        .iter()
        .map(|kind| (kind.as_str(), Value::from(kind.as_str())))
        .collect();
    attrs.insert(
        "FieldType",
        Value::Module(Rc::new(Module {
            name: "FieldType",
            attrs: field_types,
        })),
    );
    Module {
        name: "uzoncalc",
        attrs,
    }
}

/// Wraps `function` as the entry point of its script.
pub(super) fn make_entry(function: &Rc<Function>, name: Option<Rc<str>>) -> Result<Value, Exc> {
    let FunctionBody::Def(def) = &function.body else {
        return Err(OpError::type_error("uzon_calc cannot decorate a lambda").into());
    };
    if !def.is_async {
        return Err(OpError::type_error(format!(
            "Function {} must be async",
            function.name
        ))
        .into());
    }
    Ok(Value::Entry(Rc::new(Entry {
        function: Rc::clone(function),
        def: Arc::clone(def),
        name,
    })))
}

fn uzon_calc(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    if let [Value::Function(function)] = &args.positional[..] {
        return make_entry(function, None);
    }
    let [name] = bind(args, "uzon_calc", &["name"], 0)?;
    let name = match name {
        None | Some(Value::None) => None,
        Some(name) => Some(name.expect_str("name")?),
    };
    Ok(Value::EntryDecorator(name))
}

fn run(_: &mut Interpreter, _: Args) -> Result<Value, Exc> {
    Err(OpError::runtime_error(
        "runs are started by the host; call the script through `uzoncalc run` or the executor",
    )
    .into())
}

fn opt_string(value: Option<Value>, what: &str) -> Result<Option<String>, Exc> {
    match value {
        None | Some(Value::None) => Ok(None),
        Some(value) => Ok(Some(value.expect_str(what)?.to_string())),
    }
}

fn flag(value: Option<Value>) -> bool {
    value.is_some_and(|value| value.truthy())
}

// Interaction

fn ui(interp: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let [title, fields, caption] = bind(args, "UI", &["title", "fields", "caption"], 2)?;
    let title = title.unwrap_or(Value::None).expect_str("title")?.to_string();
    let handles: Vec<Rc<RefCell<Field>>> = fields
        .unwrap_or(Value::None)
        .iterate()?
        .into_iter()
        .map(|field| match field {
            Value::Field(field) => Ok(field),
            other => Err(OpError::type_error(format!(
                "UI fields must be Field objects, not '{}'",
                other.type_name()
            ))),
        })
        .collect::<Result<_, _>>()?;
    let mut window = Window {
        title,
        caption: opt_string(caption, "caption")?,
        fields: handles.iter().map(|field| field.borrow().clone()).collect(),
    };
    let values = request_inputs(&mut interp.ctx, &mut window).map_err(|err| match err {
        InteractionError::Cancelled => Exc::Cancelled,
        InteractionError::NotConnected => OpError::runtime_error(err.to_string()).into(),
    })?;
    for (handle, field) in handles.iter().zip(&window.fields) {
        handle.borrow_mut().default = field.default.clone();
    }
    let entries = values
        .iter()
        .map(|(key, value)| (Key::str(key), Value::from_json(value)))
        .collect();
    Ok(Value::dot_dict(entries))
}

fn field(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let names = [
        "name",
        "label",
        "type",
        "placeholder",
        "default",
        "options",
        "vif",
    ];
    let [name, label, kind, placeholder, default, options, vif] = bind(args, "Field", &names, 1)?;
    let name = name.unwrap_or(Value::None).expect_str("name")?.to_string();
    let label = opt_string(label, "label")?.unwrap_or_else(|| name.clone());
    let kind = match opt_string(kind, "type")? {
        Some(kind) => FieldType::from_str(&kind)
            .map_err(|_| OpError::value_error(format!("unknown field type '{kind}'")))?,
        None => FieldType::default(),
    };
    let mut field = Field::new(name, label, kind);
    field.placeholder = opt_string(placeholder, "placeholder")?;
    field.default = match default {
        Some(default) => default.to_json()?,
        None => Json::Null,
    };
    field.options = match options {
        None | Some(Value::None) => None,
        Some(options) => Some(options.iterate()?.iter().map(Value::to_str).collect()),
    };
    field.vif = opt_string(vif, "vif")?;
    Ok(Value::Field(Rc::new(RefCell::new(field))))
}

// Directives

fn inline(interp: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let [separator] = bind(args, "inline", &["separator"], 0)?;
    let separator = opt_string(separator, "separator")?.unwrap_or_else(|| " ".to_string());
    interp.ctx.start_inline(&separator);
    Ok(Value::None)
}

fn endline(interp: &mut Interpreter, _: Args) -> Result<Value, Exc> {
    interp.ctx.end_inline();
    Ok(Value::None)
}

fn set_option(interp: &mut Interpreter, option: ContextOptions, on: bool) -> Result<Value, Exc> {
    interp.ctx.set_option(option, on);
    Ok(Value::None)
}

fn enable_substitution(interp: &mut Interpreter, _: Args) -> Result<Value, Exc> {
    set_option(interp, ContextOptions::ENABLE_SUBSTITUTION, true)
}

fn disable_substitution(interp: &mut Interpreter, _: Args) -> Result<Value, Exc> {
    set_option(interp, ContextOptions::ENABLE_SUBSTITUTION, false)
}

fn enable_fstring_equation(interp: &mut Interpreter, _: Args) -> Result<Value, Exc> {
    set_option(interp, ContextOptions::ENABLE_FSTRING_EQUATION, true)
}

fn disable_fstring_equation(interp: &mut Interpreter, _: Args) -> Result<Value, Exc> {
    set_option(interp, ContextOptions::ENABLE_FSTRING_EQUATION, false)
}

fn alias(interp: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let [name, value] = bind(args, "alias", &["name", "value"], 1)?;
    let name = name.unwrap_or(Value::None).expect_str("name")?;
    let value = opt_string(value, "value")?;
    interp.ctx.set_alias(&name, value.as_deref());
    Ok(Value::None)
}

// Document settings

fn one_string(args: Args, function: &str, name: &str) -> Result<String, Exc> {
    let [value] = bind(args, function, &[name], 1)?;
    Ok(value.unwrap_or(Value::None).expect_str(name)?.to_string())
}

fn doc_title(interp: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    interp.ctx.doc.title = Some(one_string(args, "doc_title", "title")?);
    Ok(Value::None)
}

fn page_size(interp: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    interp.ctx.doc.page_size = one_string(args, "page_size", "size")?;
    Ok(Value::None)
}

fn font_family(interp: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    interp.ctx.doc.font_family = one_string(args, "font_family", "family")?;
    Ok(Value::None)
}

fn style(interp: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let [name, value] = bind(args, "style", &["name", "value"], 2)?;
    let name = name.unwrap_or(Value::None).expect_str("name")?.to_string();
    let rules = string_map(&value.unwrap_or(Value::None), "style")?;
    interp.ctx.doc.styles.insert(name, rules);
    Ok(Value::None)
}

fn toc(interp: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let [title] = bind(args, "toc", &["title"], 0)?;
    let title = opt_string(title, "title")?;
    let block = doc::toc_block(title.as_deref().unwrap_or("Table of Contents"));
    interp.ctx.append_content(block);
    Ok(Value::None)
}

fn save(interp: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let [filename] = bind(args, "save", &["filename"], 0)?;
    let filename = opt_string(filename, "filename")?;
    let path = doc::save(&interp.ctx, filename.as_deref())
        .map_err(|err| OpError::new("OSError", err.to_string()))?;
    Ok(Value::from(path.display().to_string()))
}

// JSON cache

fn db_get(interp: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let [key, default] = bind(args, "db_get", &["key", "default"], 1)?;
    let key = key.unwrap_or(Value::None).to_json()?;
    let db = interp
        .ctx
        .db()
        .map_err(|err| OpError::new("OSError", err.to_string()))?;
    Ok(match db.get(&key) {
        Some(value) => Value::from_json(value),
        None => default.unwrap_or(Value::None),
    })
}

fn db_set(interp: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let [key, value] = bind(args, "db_set", &["key", "value"], 2)?;
    let key = key.unwrap_or(Value::None).to_json()?;
    let value = value.unwrap_or(Value::None).to_json()?;
    interp
        .ctx
        .db()
        .map_err(|err| OpError::new("OSError", err.to_string()))?
        .set(&key, value);
    Ok(Value::None)
}

// Elements

fn string_map(value: &Value, what: &str) -> Result<IndexMap<String, String>, Exc> {
    let Value::Dict(dict) = value else {
        return Err(OpError::type_error(format!(
            "{what} expects a dict, not '{}'",
            value.type_name()
        ))
        .into());
    };
    Ok(dict
        .borrow()
        .entries
        .iter()
        .map(|(key, value)| (key.to_value().to_str(), value.to_str()))
        .collect())
}

/// `props(id=..., classes=..., styles={...}, **custom)` as a dict.
fn props(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    if !args.positional.is_empty() {
        return Err(OpError::type_error("props() takes keyword arguments only").into());
    }
    let entries = args
        .keywords
        .into_iter()
        .map(|(key, value)| (Key::str(&key), value))
        .collect();
    Ok(Value::dict(entries))
}

fn to_props(value: Option<Value>) -> Result<Option<Props>, Exc> {
    let Some(value) = value.filter(|value| !value.is_none()) else {
        return Ok(None);
    };
    let Value::Dict(dict) = &value else {
        return Err(OpError::type_error(format!(
            "props must be a dict, not '{}'",
            value.type_name()
        ))
        .into());
    };
    let mut props = Props::default();
    for (key, value) in &dict.borrow().entries {
        let key = key.to_value().to_str();
        match key.as_str() {
            "id" => props.id = Some(value.to_str()),
            "classes" | "class" => props.class = Some(value.to_str()),
            "styles" | "style" => props.style = string_map(value, "styles")?,
            "custom" => props.custom.extend(string_map(value, "custom")?),
            _ => {
                props.custom.insert(key, value.to_str());
            }
        }
    }
    Ok(Some(props))
}

/// Element children: a string, or a list of strings joined without separator.
fn children(value: Option<Value>) -> Result<String, Exc> {
    Ok(match value {
        None | Some(Value::None) => String::new(),
        Some(Value::List(items)) => items.borrow().iter().map(Value::to_str).collect(),
        Some(Value::Tuple(items)) => items.iter().map(Value::to_str).collect(),
        Some(other) => other.to_str(),
    })
}

/// Appends `html` when persisted; lowercase helpers also return it.
fn emit(interp: &mut Interpreter, html: String, persist: bool, returns: bool) -> Value {
    if !persist {
        return Value::from(html);
    }
    if returns {
        interp.ctx.append_content(html.clone());
        Value::from(html)
    } else {
        interp.ctx.append_content(html);
        Value::None
    }
}

fn tagged(interp: &mut Interpreter, tag: &str, mut args: Args, always: bool) -> Result<Value, Exc> {
    if let Some(content) = args.keywords.shift_remove("children") {
        args.keywords.insert("content".to_string(), content);
    }
    let [content, classes, props, persist] =
        bind(args, tag, &["content", "classes", "props", "persist"], 0)?;
    let html = elements::element(
        tag,
        &children(content)?,
        opt_string(classes, "classes")?.as_deref(),
        to_props(props)?.as_ref(),
    );
    Ok(emit(interp, html, always || flag(persist), !always))
}

fn h(interp: &mut Interpreter, mut args: Args) -> Result<Value, Exc> {
    if args.positional.is_empty() {
        return Err(OpError::type_error("h() missing required argument 'tag'").into());
    }
    let tag = args.positional.remove(0).expect_str("tag")?;
    tagged(interp, &tag, args, false)
}

macro_rules! tag_helpers {
    ($($lower:ident, $upper:ident => $tag:literal;)*) => {
        $(
            fn $lower(interp: &mut Interpreter, args: Args) -> Result<Value, Exc> {
                tagged(interp, $tag, args, false)
            }

            fn $upper(interp: &mut Interpreter, args: Args) -> Result<Value, Exc> {
                tagged(interp, $tag, args, true)
            }
        )*
    };
}

tag_helpers! {
    h1, persist_h1 => "h1";
    h2, persist_h2 => "h2";
    h3, persist_h3 => "h3";
    h4, persist_h4 => "h4";
    h5, persist_h5 => "h5";
    h6, persist_h6 => "h6";
    p, persist_p => "p";
    div, persist_div => "div";
    span, persist_span => "span";
}

fn row_html(args: Args) -> Result<(String, bool), Exc> {
    let [content, classes, props, persist, tag] = bind(
        args,
        "row",
        &["content", "classes", "props", "persist", "tag"],
        0,
    )?;
    let tag = opt_string(tag, "tag")?.unwrap_or_else(|| "div".to_string());
    let classes = opt_string(classes, "classes")?
        .unwrap_or_else(|| "flex flex-row items-center".to_string());
    let html = elements::element(
        &tag,
        &children(content)?,
        Some(&classes),
        to_props(props)?.as_ref(),
    );
    Ok((html, flag(persist)))
}

fn row(interp: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let (html, persist) = row_html(args)?;
    Ok(emit(interp, html, persist, true))
}

fn persist_row(interp: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let (html, _) = row_html(args)?;
    Ok(emit(interp, html, true, false))
}

fn br(_: &mut Interpreter, _: Args) -> Result<Value, Exc> {
    Ok(Value::from(elements::br()))
}

fn persist_br(interp: &mut Interpreter, _: Args) -> Result<Value, Exc> {
    Ok(emit(interp, elements::br(), true, false))
}

fn cells(value: &Value) -> Result<Vec<String>, Exc> {
    Ok(value.iterate()?.iter().map(Value::to_str).collect())
}

/// Rows of a table; a flat list of cells is one row.
fn table_rows(value: Option<Value>) -> Result<Vec<Vec<String>>, Exc> {
    let Some(value) = value.filter(|value| !value.is_none()) else {
        return Ok(Vec::new());
    };
    let rows = value.iterate()?;
    if rows.iter().all(Value::is_array) {
        rows.iter().map(cells).collect()
    } else {
        Ok(vec![rows.iter().map(Value::to_str).collect()])
    }
}

fn table_html(args: Args) -> Result<(String, bool), Exc> {
    let [headers, rows, title, classes, props, persist] = bind(
        args,
        "table",
        &["headers", "rows", "title", "classes", "props", "persist"],
        0,
    )?;
    let html = elements::table(
        &table_rows(headers)?,
        &table_rows(rows)?,
        opt_string(title, "title")?.as_deref(),
        opt_string(classes, "classes")?.as_deref(),
        to_props(props)?.as_ref(),
    );
    Ok((html, flag(persist)))
}

fn table(interp: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let (html, persist) = table_html(args)?;
    Ok(emit(interp, html, persist, true))
}

fn persist_table(interp: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let (html, _) = table_html(args)?;
    Ok(emit(interp, html, true, false))
}

fn th(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let [value, classes, rowspan, colspan] =
        bind(args, "th", &["value", "classes", "rowspan", "colspan"], 1)?;
    let span = |value: Option<Value>, what: &str| -> Result<u32, Exc> {
        match value {
            None | Some(Value::None) => Ok(1),
            Some(value) => {
                let span = value.expect_int(what)?;
                u32::try_from(span)
                    .map_err(|_| OpError::value_error(format!("{what} must be positive")).into())
            }
        }
    };
    Ok(Value::from(elements::th(
        &value.unwrap_or(Value::None).to_str(),
        opt_string(classes, "classes")?.as_deref(),
        span(rowspan, "rowspan")?,
        span(colspan, "colspan")?,
    )))
}

fn tr(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let [value, classes] = bind(args, "tr", &["value", "classes"], 1)?;
    Ok(Value::from(elements::tr(
        &children(value)?,
        opt_string(classes, "classes")?.as_deref(),
    )))
}

fn td(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let [value, classes] = bind(args, "td", &["value", "classes"], 1)?;
    Ok(Value::from(elements::td(
        &value.unwrap_or(Value::None).to_str(),
        opt_string(classes, "classes")?.as_deref(),
    )))
}

fn code_html(args: Args) -> Result<(String, bool), Exc> {
    let [content, language, persist] =
        bind(args, "code", &["content", "language", "persist"], 1)?;
    let html = elements::code(
        &content.unwrap_or(Value::None).to_str(),
        opt_string(language, "language")?.as_deref(),
    );
    Ok((html, flag(persist)))
}

fn code(interp: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let (html, persist) = code_html(args)?;
    Ok(emit(interp, html, persist, true))
}

fn persist_code(interp: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let (html, _) = code_html(args)?;
    Ok(emit(interp, html, true, false))
}

fn info_html(args: Args) -> Result<(String, bool), Exc> {
    let [content, persist] = bind(args, "info", &["content", "persist"], 1)?;
    Ok((elements::info(&children(content)?), flag(persist)))
}

fn info(interp: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let (html, persist) = info_html(args)?;
    Ok(emit(interp, html, persist, true))
}

fn persist_info(interp: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let (html, _) = info_html(args)?;
    Ok(emit(interp, html, true, false))
}

fn latex(interp: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let [content, persist] = bind(args, "latex", &["content", "persist"], 1)?;
    let html = elements::latex(&content.unwrap_or(Value::None).to_str());
    Ok(emit(interp, html, flag(persist), true))
}

fn img_html(args: Args) -> Result<(String, bool), Exc> {
    let [src, alt, width, height, classes, props, persist] = bind(
        args,
        "img",
        &["src", "alt", "width", "height", "classes", "props", "persist"],
        1,
    )?;
    let dimension = |value: Option<Value>| -> Option<String> {
        match value {
            None | Some(Value::None) => None,
            Some(value) => Some(value.to_str()),
        }
    };
    let options = ImageOptions {
        alt: opt_string(alt, "alt")?,
        width: dimension(width),
        height: dimension(height),
        classes: opt_string(classes, "classes")?,
        props: to_props(props)?,
    };
    let html = elements::img(&src.unwrap_or(Value::None).expect_str("src")?, &options);
    Ok((html, flag(persist)))
}

fn img(interp: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let (html, persist) = img_html(args)?;
    Ok(emit(interp, html, persist, true))
}

fn persist_img(interp: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let (html, _) = img_html(args)?;
    Ok(emit(interp, html, true, false))
}

fn plot_html(args: Args) -> Result<(String, bool), Exc> {
    let [figure, persist] = bind(args, "plot", &["figure", "persist"], 1)?;
    let figure = figure.unwrap_or(Value::None).expect_str("figure")?;
    Ok((elements::plot(&figure), flag(persist)))
}

fn plot(interp: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let (html, persist) = plot_html(args)?;
    Ok(emit(interp, html, persist, true))
}

fn persist_plot(interp: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let (html, _) = plot_html(args)?;
    Ok(emit(interp, html, true, false))
}
