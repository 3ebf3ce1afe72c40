use crate::context::Context;
use crate::driver::{Driver, RunConfig};
use crate::render;
use anyhow::{Context as AnyhowContext, Result};
use std::sync::atomic::Ordering;
use tokio::runtime::Runtime;

/// Handles the 'destroy' command - tears down everything in recorded state
pub struct DestroyCommand;

impl DestroyCommand {
    /// Execute the destroy command
    pub fn execute(ctx: &Context, config: &RunConfig, auto_approve: bool) -> Result<i32> {
        let mut driver = Driver::new(ctx.clone(), config.clone());
        let result = Self::run(ctx, &mut driver, auto_approve);
        if result.is_err() {
            ctx.output
                .dimmed(&format!("Halted after phase: {}", driver.phase()));
        }
        result
    }

    fn run(ctx: &Context, driver: &mut Driver, auto_approve: bool) -> Result<i32> {
        let store = driver.state_store();
        driver.initialize(store.as_ref())?;

        let plan = driver.destroy_plan(store.as_ref())?;
        if plan.actions.is_empty() {
            ctx.output.success("Nothing to destroy; state is empty.");
            return Ok(0);
        }

        render::render_plan(&plan);
        ctx.output.blank();

        if !auto_approve {
            let approved = ctx.input.confirm(
                &format!(
                    "Destroy all {} resources? This cannot be undone.",
                    plan.actions.len()
                ),
                false,
            )?;
            if !approved {
                ctx.output.info("Destroy cancelled, no changes made.");
                return Ok(0);
            }
        }

        let provider = driver.provider()?;
        let executor = driver.executor(provider, store.clone());

        let cancel = executor.cancellation_flag();
        if ctrlc::set_handler(move || cancel.store(true, Ordering::SeqCst)).is_err() {
            ctx.output
                .warning("Could not install Ctrl-C handler; cancellation is unavailable");
        }

        let runtime = Runtime::new().context("Failed to create async runtime")?;
        let report = runtime.block_on(driver.execute(&executor, &plan, true))?;

        render::render_report(&report);

        Ok(if report.is_partial() { 2 } else { 0 })
    }
}
