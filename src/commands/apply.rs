use crate::context::Context;
use crate::driver::{self, Driver, RunConfig};
use crate::plan::Plan;
use crate::render;
use anyhow::{Context as AnyhowContext, Result};
use std::path::Path;
use std::sync::atomic::Ordering;
use tokio::runtime::Runtime;

/// Handles the 'apply' command - executes a plan against the remote API
pub struct ApplyCommand;

impl ApplyCommand {
    /// Execute the apply command
    pub fn execute(
        ctx: &Context,
        config: &RunConfig,
        plan_file: Option<&Path>,
        auto_approve: bool,
    ) -> Result<i32> {
        let mut driver = Driver::new(ctx.clone(), config.clone());
        let result = Self::run(ctx, &mut driver, plan_file, auto_approve);
        if result.is_err() {
            ctx.output
                .dimmed(&format!("Halted after phase: {}", driver.phase()));
        }
        result
    }

    fn run(
        ctx: &Context,
        driver: &mut Driver,
        plan_file: Option<&Path>,
        auto_approve: bool,
    ) -> Result<i32> {
        let store = driver.state_store();
        driver.initialize(store.as_ref())?;

        let (stack, plan) = match plan_file {
            Some(path) => {
                let plan = Plan::from_file(ctx.fs.as_ref(), path)?;
                let stack = driver.validate()?;
                (stack, plan)
            }
            None => driver.plan(store.as_ref())?,
        };

        if !plan.summary.has_changes() {
            ctx.output
                .success("No changes. The stack matches the recorded state.");
            return Ok(0);
        }

        render::render_plan(&plan);
        ctx.output.blank();

        if !auto_approve {
            let approved = ctx.input.confirm(
                &format!("Apply these {} changes?", plan.summary.total_changes()),
                false,
            )?;
            if !approved {
                ctx.output.info("Apply cancelled, no changes made.");
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
        let report = runtime.block_on(driver.execute(&executor, &plan, false))?;

        render::render_report(&report);

        let stale = driver::stale_addresses(&report);
        let outputs = driver.outputs(&stack, store.as_ref(), &stale)?;
        if !outputs.is_empty() {
            ctx.output.section("Outputs");
            render::render_outputs(&outputs);
        }

        Ok(if report.is_partial() { 2 } else { 0 })
    }
}
