//! Delegation Tests for Events and Mutations
//!
//! These tests verify dispatch through the shared listeners:
//! - delegation survives insertion of new descendants
//! - keyboard aliases, outside clicks and disabled targets
//! - load delegates, late loads and mutation delegates

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    use crate::config::EngineConfig;
    use crate::delegation::Event;
    use crate::dom::NodeId;
    use crate::engine::Engine;
    use crate::evaluator::EvaluatorRegistry;
    use crate::imports::Pipe;
    use crate::view::View;
    use crate::REF_ATTRIBUTE;

    type Hits = Rc<RefCell<Vec<(String, NodeId)>>>;

    /// A delegate named `record` that logs the event kind and the matched node.
    fn recording(hits: &Hits) -> EvaluatorRegistry {
        let hits = Rc::clone(hits);
        EvaluatorRegistry::new().delegate("record", move |ctx| {
            hits.borrow_mut().push((ctx.event.kind.clone(), ctx.node));
        })
    }

    fn mount(engine: &mut Engine, view: impl Into<View>) -> NodeId {
        let body = engine.document().body();
        engine.render_into(&view.into(), body).unwrap()
    }

    fn click(engine: &mut Engine, target: NodeId) -> usize {
        engine.dispatch_event(&mut Event::new("click", target))
    }

    #[test]
    fn test_delegation_survives_insertion() {
        let hits: Hits = Rc::default();
        let mut engine = Engine::new(EngineConfig::default(), recording(&hits));
        let list = mount(&mut engine, View::el("ul").on("click", "record"));

        let item = engine.render_into(&View::el("li").child("late").into(), list).unwrap();
        let label = engine.document().children(item)[0];
        assert_eq!(click(&mut engine, label), 1);
        assert_eq!(*hits.borrow(), vec![("click".to_string(), list)]);
    }

    #[test]
    fn test_click_outside_the_chain_is_ignored() {
        let hits: Hits = Rc::default();
        let mut engine = Engine::new(EngineConfig::default(), recording(&hits));
        let menu = mount(&mut engine, View::el("nav").on("click", "record"));
        let other = mount(&mut engine, View::el("p"));
        assert_eq!(click(&mut engine, other), 0);
        assert_eq!(click(&mut engine, menu), 1);
    }

    #[test]
    fn test_click_outside_fires_only_outside() {
        let hits: Hits = Rc::default();
        let mut engine = Engine::new(EngineConfig::default(), recording(&hits));
        let dialog = mount(&mut engine, View::el("dialog").on("clickOutside", "record").child(View::el("button")));
        let inner = engine.document().children(dialog)[0];
        let page = mount(&mut engine, View::el("main"));

        assert_eq!(click(&mut engine, inner), 0);
        assert_eq!(click(&mut engine, page), 1);
        assert_eq!(hits.borrow()[0].1, dialog);
    }

    #[test]
    fn test_enter_keypress_counts_as_click() {
        let hits: Hits = Rc::default();
        let mut engine = Engine::new(EngineConfig::default(), recording(&hits));
        let button = mount(&mut engine, View::el("button").on("click", "record"));

        let mut enter = Event::new("keypress", button).with_key("Enter", 13);
        assert_eq!(engine.dispatch_event(&mut enter), 1);
        let mut other = Event::new("keypress", button).with_key("a", 97);
        assert_eq!(engine.dispatch_event(&mut other), 0);
    }

    #[test]
    fn test_keydown_kind_matches_its_key() {
        let hits: Hits = Rc::default();
        let mut engine = Engine::new(EngineConfig::default(), recording(&hits));
        let field = mount(&mut engine, View::el("input").on("keydown:Escape", "record"));

        let mut tab = Event::new("keydown", field).with_key("Tab", 9);
        assert_eq!(engine.dispatch_event(&mut tab), 0);
        let mut escape = Event::new("keydown", field).with_key("Escape", 27);
        assert_eq!(engine.dispatch_event(&mut escape), 1);
    }

    #[test]
    fn test_disabled_target_is_skipped() {
        let hits: Hits = Rc::default();
        let mut engine = Engine::new(EngineConfig::default(), recording(&hits));
        let button = mount(&mut engine, View::el("button").attr("disabled", true).on("click", "record"));
        assert_eq!(click(&mut engine, button), 0);
    }

    #[test]
    fn test_prevent_default_marks_the_event() {
        let hits: Hits = Rc::default();
        let mut engine = Engine::new(EngineConfig::default(), recording(&hits));
        let form = mount(&mut engine, View::el("form").prevent_default().on("submit", "record"));

        let mut submit = Event::new("submit", form);
        engine.dispatch_event(&mut submit);
        assert!(submit.default_prevented());
    }

    #[test]
    fn test_delegate_can_write_to_the_store() {
        let evaluators = EvaluatorRegistry::new()
            .delegate("increment", |ctx| {
                let next = ctx.engine.get("count").as_i64().unwrap_or(0) + 1;
                let _ = ctx.engine.set("count", next);
            })
            .handler("show", |v, _, _| Some(v.clone().into()));
        let mut engine = Engine::new(EngineConfig::default(), evaluators);
        let counter = mount(
            &mut engine,
            View::el("div")
                .child(View::el("button").on("click", "increment"))
                .child(View::el("output").bind("count").eval("textContent", "show")),
        );
        let button = engine.document().children(counter)[0];
        let output = engine.document().children(counter)[1];

        click(&mut engine, button);
        click(&mut engine, button);
        assert_eq!(engine.document().text_content(output), "2");
    }

    #[test]
    fn test_pending_target_resolves_when_it_appears() {
        let hits: Hits = Rc::default();
        let mut engine = Engine::new(EngineConfig::default(), recording(&hits));
        engine.delegate("click", "late-1", "record", Pipe::new(), false).unwrap();

        let anchor = mount(&mut engine, View::el("a"));
        assert_eq!(click(&mut engine, anchor), 0);
        assert_eq!(engine.review().delegates["click"].len(), 1);

        let button = mount(&mut engine, View::el("button").attr(REF_ATTRIBUTE, "late-1"));
        assert_eq!(click(&mut engine, button), 1);
        assert_eq!(hits.borrow()[0].1, button);
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let mut engine = Engine::new(EngineConfig::default(), EvaluatorRegistry::new());
        let body = engine.document().body();
        let err = engine.delegate("hover", body, "record", Pipe::new(), false).unwrap_err();
        assert_eq!(err.code(), "Z-BIND-RENDER-002");
    }

    #[test]
    fn test_detached_target_is_skipped_then_swept() {
        let hits: Hits = Rc::default();
        let mut engine = Engine::new(EngineConfig::default(), recording(&hits));
        let panel = mount(&mut engine, View::el("aside").on("clickOutside", "record"));
        let page = mount(&mut engine, View::el("main"));

        engine.document_mut().remove(panel);
        assert_eq!(click(&mut engine, page), 0);

        engine.advance(Duration::from_millis(250));
        assert!(engine.review().delegates.is_empty());
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // LOAD
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_load_fires_once_for_attached_targets() {
        let hits: Hits = Rc::default();
        let mut engine = Engine::new(EngineConfig::default(), recording(&hits));
        let image = mount(&mut engine, View::el("img").on("load", "record"));

        assert_eq!(engine.fire_load(), 1);
        assert!(engine.is_loaded());
        assert_eq!(*hits.borrow(), vec![("load".to_string(), image)]);
    }

    #[test]
    fn test_late_load_waits_for_attachment() {
        let hits: Hits = Rc::default();
        let mut engine = Engine::new(EngineConfig::default(), recording(&hits));
        engine.fire_load();

        engine.delegate("load", "widget", "record", Pipe::new(), false).unwrap();
        engine.advance(Duration::from_millis(100));
        assert!(hits.borrow().is_empty());

        let widget = mount(&mut engine, View::el("div").attr(REF_ATTRIBUTE, "widget"));
        engine.advance(Duration::from_millis(50));
        assert_eq!(*hits.borrow(), vec![("load".to_string(), widget)]);

        engine.advance(Duration::from_secs(1));
        assert_eq!(hits.borrow().len(), 1);
    }

    #[test]
    fn test_late_load_is_abandoned_after_timeout() {
        let hits: Hits = Rc::default();
        let mut engine = Engine::new(EngineConfig::default(), recording(&hits));
        engine.fire_load();
        engine.delegate("load", "never", "record", Pipe::new(), false).unwrap();

        engine.advance(Duration::from_millis(5000));
        assert!(engine.delegation.late_loads().is_empty());

        mount(&mut engine, View::el("div").attr(REF_ATTRIBUTE, "never"));
        engine.advance(Duration::from_secs(1));
        assert!(hits.borrow().is_empty());
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // MUTATIONS
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_child_list_mutation_matches_exact_target() {
        let hits: Hits = Rc::default();
        let mut engine = Engine::new(EngineConfig::default(), recording(&hits));
        let feed = mount(&mut engine, View::el("section").on("childList", "record").child(View::el("div")));
        let inner = engine.document().children(feed)[0];
        assert!(engine.delegation.is_observing());

        let text = engine.document_mut().create_text("deep");
        engine.document_mut().append_child(inner, text);
        engine.settle();
        assert!(hits.borrow().is_empty());

        let item = engine.document_mut().create_element("article");
        engine.document_mut().append_child(feed, item);
        engine.settle();
        assert_eq!(*hits.borrow(), vec![("childList".to_string(), feed)]);
    }

    #[test]
    fn test_attribute_mutation_filters_by_name() {
        let hits: Hits = Rc::default();
        let mut engine = Engine::new(EngineConfig::default(), recording(&hits));
        let card = mount(&mut engine, View::el("div").on("attributes:class", "record"));

        engine.document_mut().set_attribute(card, "title", "x");
        engine.settle();
        assert!(hits.borrow().is_empty());

        engine.document_mut().set_attribute(card, "class", "open");
        engine.settle();
        assert_eq!(*hits.borrow(), vec![("attributes".to_string(), card)]);
    }
}
