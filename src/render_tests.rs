//! Render Tests for View Trees
//!
//! These tests pin down how declarative nodes become document nodes:
//! - property dispatch with attribute fallback
//! - handler output as text, attributes and child views
//! - pipes, imports and server markup

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    use crate::config::EngineConfig;
    use crate::dom::Namespace;
    use crate::engine::Engine;
    use crate::evaluator::EvaluatorRegistry;
    use crate::imports::{Module, Pipe, StaticModules};
    use crate::view::{Output, View};
    use crate::REF_ATTRIBUTE;

    fn show() -> EvaluatorRegistry {
        EvaluatorRegistry::new().handler("show", |value, _, _| Some(Output::Value(value.clone())))
    }

    fn html_of(engine: &mut Engine, view: impl Into<View>) -> String {
        engine.render_to_string(&view.into()).unwrap()
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // LITERAL PROPERTIES
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_literal_attributes_and_text() {
        let mut engine = Engine::new(EngineConfig::default(), EvaluatorRegistry::new());
        let html = html_of(
            &mut engine,
            View::el("button")
                .attr("type", "submit")
                .attr("disabled", true)
                .attr("hidden", false)
                .attr("data-id", 7)
                .text("a < b"),
        );
        assert_eq!(
            html,
            r#"<button type="submit" disabled="" data-id="7">a &lt; b</button>"#
        );
    }

    #[test]
    fn test_style_object_is_flattened() {
        let mut engine = Engine::new(EngineConfig::default(), EvaluatorRegistry::new());
        let html = html_of(
            &mut engine,
            View::el("div").style(json!({ "fontSize": "12px", "marginTop": 0 })),
        );
        assert_eq!(html, r#"<div style="font-size: 12px; margin-top: 0"></div>"#);
    }

    #[test]
    fn test_false_condition_renders_nothing() {
        let mut engine = Engine::new(EngineConfig::default(), show());
        let view: View = View::el("ul")
            .child(View::el("li").text("kept"))
            .child(View::el("li").when(false).bind("x").eval("textContent", "show"))
            .into();
        assert_eq!(html_of(&mut engine, view), "<ul><li>kept</li></ul>");
        assert!(engine.review().handlers.is_empty());
    }

    #[test]
    fn test_inner_html_is_parsed() {
        let mut engine = Engine::new(EngineConfig::default(), EvaluatorRegistry::new());
        let html = html_of(&mut engine, View::el("div").inner_html("<em>hi</em> there"));
        assert_eq!(html, "<div><em>hi</em> there</div>");
    }

    #[test]
    fn test_camel_case_attribute_keeps_case() {
        let mut engine = Engine::new(EngineConfig::default(), EvaluatorRegistry::new());
        let html = html_of(&mut engine, View::el("svg").attr("viewBox", "0 0 10 10"));
        assert_eq!(html, r#"<svg viewBox="0 0 10 10"></svg>"#);
    }

    #[test]
    fn test_svg_descendants_inherit_the_namespace() {
        let mut engine = Engine::new(EngineConfig::default(), EvaluatorRegistry::new());
        let html = html_of(
            &mut engine,
            View::el("svg")
                .child(
                    View::el("defs")
                        .child(View::el("linearGradient").attr("gradientUnits", "userSpaceOnUse"))
                        .child(View::el("clipPath")),
                )
                .child(View::el("foreignObject").child(View::el("DIV"))),
        );
        assert_eq!(
            html,
            concat!(
                r#"<svg><defs><linearGradient gradientUnits="userSpaceOnUse"></linearGradient>"#,
                r#"<clipPath></clipPath></defs><foreignObject><div></div></foreignObject></svg>"#
            )
        );
    }

    #[test]
    fn test_handler_children_of_svg_stay_svg() {
        let evaluators = EvaluatorRegistry::new().handler("stops", |value, _, _| {
            let count = value.as_u64().unwrap_or(0);
            Some(Output::Views(
                (0..count).map(|_| View::from(View::el("stop"))).collect(),
            ))
        });
        let mut engine = Engine::new(EngineConfig::default(), evaluators)
            .with_store(json!({ "n": 1 }))
            .unwrap();
        let body = engine.document().body();
        let svg = engine
            .render_into(
                &View::el("svg")
                    .child(View::el("radialGradient").bind("n").eval("children", "stops"))
                    .into(),
                body,
            )
            .unwrap();
        engine.set("n", 2).unwrap();

        let gradient = engine.document().children(svg)[0];
        assert_eq!(engine.document().tag(gradient), Some("radialGradient"));
        for stop in engine.document().children(gradient) {
            assert_eq!(engine.document().element(*stop).map(|e| e.namespace), Some(Namespace::Svg));
        }
        assert_eq!(engine.document().children(gradient).len(), 2);
    }

    #[test]
    fn test_list_renders_siblings() {
        let mut engine = Engine::new(EngineConfig::default(), EvaluatorRegistry::new());
        let html = html_of(
            &mut engine,
            View::list([View::from(View::el("dt").text("a")), View::from(View::el("dd").text("b"))]),
        );
        assert_eq!(html, "<dt>a</dt><dd>b</dd>");
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // HANDLER OUTPUT
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_handler_paints_immediately_and_on_change() {
        let mut engine = Engine::new(EngineConfig::default(), show())
            .with_store(json!({ "count": 1 }))
            .unwrap();
        let body = engine.document().body();
        let node = engine
            .render_into(&View::el("span").bind("count").eval("textContent", "show").into(), body)
            .unwrap();
        assert_eq!(engine.document().outer_html(node), "<span>1</span>");

        engine.set("count", 2).unwrap();
        assert_eq!(engine.document().outer_html(node), "<span>2</span>");
    }

    #[test]
    fn test_handler_attribute_removed_on_false() {
        let evaluators = EvaluatorRegistry::new().handler("flag", |v, _, _| Some(Output::Value(v.clone())));
        let mut engine = Engine::new(EngineConfig::default(), evaluators)
            .with_store(json!({ "busy": true }))
            .unwrap();
        let body = engine.document().body();
        let node = engine
            .render_into(&View::el("button").bind("busy").eval("disabled", "flag").into(), body)
            .unwrap();
        assert!(engine.document().has_attribute(node, "disabled"));

        engine.set("busy", false).unwrap();
        assert!(!engine.document().has_attribute(node, "disabled"));
    }

    #[test]
    fn test_handler_children_replace_and_release() {
        let evaluators = EvaluatorRegistry::new().handler("items", |value, el, _| {
            let items = value.as_array().cloned().unwrap_or_default();
            Some(
                items
                    .iter()
                    .map(|item| View::from(el.el("li").text(item.as_str().unwrap_or(""))))
                    .collect::<Vec<View>>()
                    .into(),
            )
        });
        let mut engine = Engine::new(EngineConfig::default(), evaluators)
            .with_store(json!({ "todos": ["a", "b"] }))
            .unwrap();
        let body = engine.document().body();
        let list = engine
            .render_into(&View::el("ul").bind("todos").eval("children", "items").into(), body)
            .unwrap();
        assert_eq!(engine.document().inner_html(list), "<li>a</li><li>b</li>");
        let old = engine.document().children(list).to_vec();

        engine.push("todos", "c").unwrap();
        assert_eq!(engine.document().inner_html(list), "<li>a</li><li>b</li><li>c</li>");
        assert!(old.iter().all(|n| !engine.document().exists(*n)));

        let capacity = engine.document().capacity();
        for _ in 0..50 {
            engine.set("todos", json!(["x", "y", "z"])).unwrap();
        }
        assert_eq!(engine.document().capacity(), capacity);
    }

    #[test]
    fn test_evaluator_without_binding_is_skipped() {
        let mut engine = Engine::new(EngineConfig::default(), show());
        let html = html_of(&mut engine, View::el("p").eval("textContent", "show").attr("class", "x"));
        assert_eq!(html, r#"<p class="x"></p>"#);
        assert!(engine.review().handlers.is_empty());
    }

    #[test]
    fn test_json_tree_with_evaluator_reference() {
        let mut engine = Engine::new(EngineConfig::default(), show())
            .with_store(json!({ "user": { "name": "Ada" } }))
            .unwrap();
        let view = View::from_json(&json!({
            "tagName": "section",
            "children": [
                { "tagName": "h2", "binding": "user.name", "textContent": "$fn:show" },
                "plain text"
            ]
        }));
        assert_eq!(
            html_of(&mut engine, view),
            "<section><h2>Ada</h2>plain text</section>"
        );
        let handlers = engine.review().handlers;
        assert_eq!(handlers.get("user.name").map(Vec::len), Some(1));
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // PIPES
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_pipe_function_and_literal() {
        let evaluators = EvaluatorRegistry::new()
            .function("upper", |args| {
                Value::String(args[0].as_str().unwrap_or("").to_uppercase())
            })
            .handler("label", |value, _, pipe| {
                let prefix = pipe.value("prefix").and_then(Value::as_str).unwrap_or("");
                let name = pipe.call("upper", &[value.clone()])?;
                Some(format!("{}{}", prefix, name.as_str().unwrap_or("")).into())
            });
        let mut engine = Engine::new(EngineConfig::default(), evaluators)
            .with_store(json!({ "name": "ada" }))
            .unwrap();
        let view = View::el("b")
            .bind("name")
            .pipe(Pipe::new().literal("prefix", "Dr. ").function("upper", "upper"))
            .eval("textContent", "label");
        assert_eq!(html_of(&mut engine, view), "<b>Dr. ADA</b>");
    }

    #[test]
    fn test_pipe_import_resolves_through_loader() {
        let evaluators = EvaluatorRegistry::new().handler("price", |value, _, pipe| {
            let symbol = pipe.value("symbol").and_then(Value::as_str).unwrap_or("?");
            Some(format!("{}{}", symbol, value).into())
        });
        let modules = StaticModules::new().with(
            "/modules/currency.js",
            Module::new().export_value("symbol", json!("€")),
        );
        let mut engine = Engine::new(EngineConfig::default(), evaluators)
            .with_module_loader(modules)
            .with_store(json!({ "total": 12 }))
            .unwrap();
        let view = View::el("span")
            .bind("total")
            .pipe(Pipe::new().import("symbol", "/modules/currency.js", None))
            .eval("textContent", "price");
        assert_eq!(html_of(&mut engine, view), "<span>€12</span>");
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // SERVER MARKUP
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_server_render_tags_bound_nodes_and_appends_bootstrap() {
        let mut engine = Engine::new(EngineConfig::server(), show())
            .with_store(json!({ "count": 1 }))
            .unwrap();
        let html = html_of(
            &mut engine,
            View::el("main")
                .child(View::el("span").bind("count").eval("textContent", "show"))
                .child(View::el("p").text("static")),
        );
        assert!(html.starts_with(&format!(
            r#"<main><span {}="zr0">1</span><p>static</p></main><script type="module" data-zen-bootstrap>"#,
            REF_ATTRIBUTE
        )));
        assert!(html.contains(r#"import { hydrate } from "/zenith/binding.js";"#));
        assert!(html.ends_with(");</script>"));
    }

    #[test]
    fn test_client_render_has_no_bootstrap() {
        let mut engine = Engine::new(EngineConfig::default(), show());
        let html = html_of(&mut engine, View::el("span").bind("count").eval("textContent", "show"));
        assert_eq!(html, "<span></span>");
    }
}
