//! User rewrite hooks.
//!
//! An embedded scripting interpreter can take over statement
//! generation for row and query events. The engine talks to it through
//! this trait only, passing rendered SQL literals rather than interpreter
//! values. Every method defaults to a no-op so an implementation only
//! overrides the callbacks it cares about.

pub trait ScriptHook: Send {
    /// Called once before the first event is dispatched.
    fn init(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// One inserted row: qualified table name and ordered column literals.
    fn insert_rewrite(&mut self, table: &str, values: &[String]) -> anyhow::Result<()> {
        let _ = (table, values);
        Ok(())
    }

    /// One updated row pair: WHERE-side literals, then SET-side literals.
    fn update_rewrite(
        &mut self,
        table: &str,
        where_values: &[String],
        set_values: &[String],
    ) -> anyhow::Result<()> {
        let _ = (table, where_values, set_values);
        Ok(())
    }

    /// One deleted row: qualified table name and ordered column literals.
    fn delete_rewrite(&mut self, table: &str, values: &[String]) -> anyhow::Result<()> {
        let _ = (table, values);
        Ok(())
    }

    /// A statement event's text; whatever comes back is emitted in its place.
    fn query_rewrite(&mut self, text: &str) -> anyhow::Result<String> {
        Ok(text.to_string())
    }

    /// Called once after the last event.
    fn finalize(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}
