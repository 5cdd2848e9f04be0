use super::ui;
use crate::valuation::{CycleReport, ValuationOrchestrator};
use anyhow::Result;
use comfy_table::Cell;

impl CycleReport {
    pub fn display_as_table(&self) -> String {
        let mut output = format!(
            "{}\n\n",
            ui::style_text("Valuation cycle", ui::StyleType::Title)
        );
        output.push_str(&format!(
            "Processed: {}  Succeeded: {}  Failed: {}  ({}s)\n",
            self.processed,
            ui::style_text(&self.succeeded.to_string(), ui::StyleType::TotalValue),
            ui::style_text(
                &self.failed.to_string(),
                if self.failed > 0 {
                    ui::StyleType::Error
                } else {
                    ui::StyleType::TotalLabel
                }
            ),
            (self.finished_at - self.started_at).num_seconds()
        ));

        if !self.failures.is_empty() {
            let mut table = ui::new_styled_table();
            table.set_header(vec![
                ui::header_cell("Holding"),
                ui::header_cell("Code"),
                ui::header_cell("Reason"),
            ]);
            for failure in &self.failures {
                table.add_row(vec![
                    Cell::new(&failure.holding_id),
                    Cell::new(&failure.code),
                    Cell::new(&failure.reason),
                ]);
            }
            output.push('\n');
            output.push_str(&table.to_string());
        }
        output
    }
}

/// Runs one cycle immediately and prints its report.
pub async fn run_cycle(orchestrator: &ValuationOrchestrator) -> Result<()> {
    let spinner = ui::new_spinner("Valuing holdings...");
    let result = orchestrator.run_cycle().await;
    spinner.finish_and_clear();

    let report = result?;
    println!("{}", report.display_as_table());
    Ok(())
}
