use super::ui;
use crate::core::model::{Holding, Snapshot};
use crate::core::repository::PortfolioRepository;
use anyhow::{Result, anyhow};
use comfy_table::Cell;

/// Snapshot history, oldest first, with the change against the preceding snapshot.
pub fn render_history(holding: &Holding, snapshots: &[Snapshot]) -> String {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Date"),
        ui::header_cell("Price"),
        ui::header_cell("Quantity"),
        ui::header_cell("Value"),
        ui::header_cell("Change (%)"),
    ]);

    let mut previous: Option<f64> = None;
    for snapshot in snapshots {
        let change = previous
            .filter(|p| *p != 0.0)
            .map(|p| (snapshot.price - p) / p * 100.0);
        table.add_row(vec![
            Cell::new(snapshot.created_at.format("%Y-%m-%d %H:%M:%S").to_string()),
            ui::number_cell(format!("{:.2}", snapshot.price)),
            ui::number_cell(format!("{}", snapshot.quantity)),
            ui::number_cell(format!("{:.2}", snapshot.price * snapshot.quantity)),
            match change {
                Some(c) => ui::signed_cell(c, |v| format!("{v:.2}%")),
                None => ui::na_cell(),
            },
        ]);
        previous = Some(snapshot.price);
    }

    format!(
        "{} {}\n\n{}",
        ui::style_text(&holding.name, ui::StyleType::Title),
        ui::style_text(&format!("({})", holding.code), ui::StyleType::Subtle),
        table
    )
}

pub async fn display_history(repository: &dyn PortfolioRepository, holding_id: &str) -> Result<()> {
    let holding = repository
        .find_holding(holding_id)
        .await?
        .ok_or_else(|| anyhow!("Holding {holding_id} not found"))?;
    let snapshots = repository.snapshots(holding_id).await?;
    println!("{}", render_history(&holding, &snapshots));
    Ok(())
}
