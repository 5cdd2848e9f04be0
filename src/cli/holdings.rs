use super::ui;
use crate::core::model::{HoldingView, Instrument};
use crate::core::repository::PortfolioRepository;
use anyhow::Result;
use comfy_table::Cell;

/// Holdings grouped as loaded, with the last known price and the earnings of their latest
/// valuation.
pub fn render_holdings(holdings: &[(HoldingView, Option<Instrument>)]) -> String {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Holding"),
        ui::header_cell("Code"),
        ui::header_cell("Group"),
        ui::header_cell("Category"),
        ui::header_cell("Quantity"),
        ui::header_cell("Last price"),
        ui::header_cell("Earnings"),
        ui::header_cell("Earnings (%)"),
    ]);

    for (view, instrument) in holdings {
        let last_price = match instrument.as_ref().and_then(|i| i.last_price) {
            Some(p) => ui::number_cell(format!("{p:.2} {}", view.category.currency)),
            None => ui::na_cell(),
        };
        let earnings = match view.holding.earnings {
            Some(e) => ui::signed_cell(e, |v| format!("{v:.2} {}", view.category.currency)),
            None => ui::na_cell(),
        };
        let relative = match view.holding.relative_earnings {
            Some(r) => ui::signed_cell(r, |v| format!("{v:.2}%")),
            None => ui::na_cell(),
        };
        table.add_row(vec![
            Cell::new(&view.holding.name),
            Cell::new(&view.holding.code),
            Cell::new(&view.group.name),
            Cell::new(&view.category.name),
            ui::number_cell(format!("{}", view.holding.quantity)),
            last_price,
            earnings,
            relative,
        ]);
    }

    format!(
        "{}\n\n{}",
        ui::style_text("Holdings", ui::StyleType::Title),
        table
    )
}

pub async fn display_holdings(repository: &dyn PortfolioRepository) -> Result<()> {
    let holdings = repository.load_holdings().await?;
    if holdings.is_empty() {
        println!(
            "{}",
            ui::style_text("No holdings configured", ui::StyleType::Subtle)
        );
        return Ok(());
    }

    let mut rows = Vec::with_capacity(holdings.len());
    for view in holdings {
        let instrument = repository
            .find_instrument(&view.category.id, &view.holding.code)
            .await?;
        rows.push((view, instrument));
    }
    println!("{}", render_holdings(&rows));
    Ok(())
}
