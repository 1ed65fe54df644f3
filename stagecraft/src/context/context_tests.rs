//! Comprehensive tests for context module.

#[cfg(test)]
mod tests {
    use crate::context::{ContextSnapshot, PipelineContext};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_pipeline_context_creation() {
        let ctx = PipelineContext::new();
        assert_eq!(ctx.depth(), 1);
        assert_eq!(ctx.frame_labels(), vec!["root"]);
        assert!(ctx.visible_names().is_empty());
    }

    #[test]
    fn test_context_with_values_and_config() {
        let ctx = PipelineContext::new()
            .with_values([("raw", json!([1, 2]))])
            .with_config([("enabled", json!(true))]);

        assert_eq!(ctx.get("raw"), Some(&json!([1, 2])));
        assert_eq!(ctx.config("enabled"), Some(&json!(true)));
        assert!(ctx.get("enabled").is_none());
    }

    #[test]
    fn test_reads_fall_back_to_outer_frames() {
        let mut ctx = PipelineContext::new().with_values([("outer", json!(1))]);
        ctx.push_frame("group");

        assert_eq!(ctx.get("outer"), Some(&json!(1)));
        assert!(ctx.contains("outer"));
        assert!(!ctx.contains_in_scope("outer"));
    }

    #[test]
    fn test_inner_frame_shadows_outer() {
        let mut ctx = PipelineContext::new().with_values([("x", json!("outer"))]);
        ctx.push_frame("inner");
        ctx.set("x", json!("inner"));
        assert_eq!(ctx.get("x"), Some(&json!("inner")));

        assert!(ctx.pop_frame());
        assert_eq!(ctx.get("x"), Some(&json!("outer")));
    }

    #[test]
    fn test_scoped_write_not_visible_after_pop() {
        let mut ctx = PipelineContext::new();
        ctx.push_frame("iteration");
        ctx.set("local", json!(42));
        assert!(ctx.contains("local"));

        ctx.pop_frame();
        assert!(!ctx.contains("local"));
    }

    #[test]
    fn test_exported_write_survives_pop() {
        let mut ctx = PipelineContext::new();
        ctx.push_frame("iteration");
        ctx.set_exported("shared", json!("kept"));
        ctx.set("local", json!("dropped"));

        ctx.pop_frame();
        assert_eq!(ctx.get("shared"), Some(&json!("kept")));
        assert!(!ctx.contains("local"));
    }

    #[test]
    fn test_exports_travel_through_nested_frames() {
        let mut ctx = PipelineContext::new();
        ctx.push_frame("group");
        ctx.push_frame("iteration");
        ctx.set_exported("total", json!(10));

        ctx.pop_frame();
        assert!(ctx.contains_in_scope("total"));
        ctx.pop_frame();
        assert_eq!(ctx.get("total"), Some(&json!(10)));
    }

    #[test]
    fn test_discard_frame_drops_exports() {
        let mut ctx = PipelineContext::new();
        ctx.push_frame("failing");
        ctx.set_exported("partial", json!(true));

        assert!(ctx.discard_frame());
        assert!(!ctx.contains("partial"));
    }

    #[test]
    fn test_root_frame_cannot_be_popped() {
        let mut ctx = PipelineContext::new().with_values([("keep", json!(1))]);
        assert!(!ctx.pop_frame());
        assert!(!ctx.discard_frame());
        assert_eq!(ctx.depth(), 1);
        assert!(ctx.contains("keep"));
    }

    #[test]
    fn test_truncate_restores_depth() {
        let mut ctx = PipelineContext::new();
        ctx.push_frame("a");
        ctx.push_frame("b");
        ctx.push_frame("c");
        assert_eq!(ctx.depth(), 4);

        ctx.truncate(2);
        assert_eq!(ctx.frame_labels(), vec!["root", "a"]);

        ctx.truncate(0);
        assert_eq!(ctx.depth(), 1);
    }

    #[test]
    fn test_snapshot_reflects_shadowing() {
        let mut ctx = PipelineContext::new()
            .with_values([("x", json!(1)), ("y", json!(2))])
            .with_config([("mode", json!("fast"))]);
        ctx.push_frame("inner");
        ctx.set("x", json!(100));

        let snapshot = ctx.snapshot();
        assert_eq!(snapshot.get("x"), Some(&json!(100)));
        assert_eq!(snapshot.get("y"), Some(&json!(2)));
        assert_eq!(snapshot.config.get("mode"), Some(&json!("fast")));
        assert_eq!(snapshot.depth, 2);
    }

    #[test]
    fn test_snapshot_serialization() {
        let ctx = PipelineContext::new().with_values([("rows", json!([{"a": 1}]))]);
        let snapshot = ctx.snapshot();

        let json = serde_json::to_string(&snapshot).unwrap();
        let restored: ContextSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.values, snapshot.values);
        assert_eq!(snapshot.to_json()["values"]["rows"], json!([{"a": 1}]));
    }

    #[test]
    fn test_remove_only_touches_current_frame() {
        let mut ctx = PipelineContext::new().with_values([("x", json!(1))]);
        ctx.push_frame("inner");
        assert!(ctx.remove("x").is_none());
        assert!(ctx.contains("x"));
    }
}
