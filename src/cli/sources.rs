use super::ui;
use crate::registry::SourceRegistry;
use comfy_table::Cell;

/// Registered sources, followed by how each label would resolve.
pub fn render_sources(registry: &SourceRegistry, labels: &[String]) -> String {
    let mut table = ui::new_styled_table();
    table.set_header(vec![ui::header_cell("Source"), ui::header_cell("Name")]);
    for id in registry.list_available() {
        let name = id
            .parse::<crate::core::price::SourceKind>()
            .map(|kind| kind.display_name())
            .unwrap_or(id);
        table.add_row(vec![Cell::new(id), Cell::new(name)]);
    }
    let mut output = format!(
        "{}\n\n{}",
        ui::style_text("Price sources", ui::StyleType::Title),
        table
    );

    if !labels.is_empty() {
        let mut checks = ui::new_styled_table();
        checks.set_header(vec![
            ui::header_cell("Label"),
            ui::header_cell("Status"),
            ui::header_cell("Source"),
            ui::header_cell("Message"),
        ]);
        for label in labels {
            let check = registry.validate(label);
            checks.add_row(vec![
                Cell::new(label),
                ui::status_cell(check.ok),
                Cell::new(&check.resolved_category),
                Cell::new(&check.message),
            ]);
        }
        output.push_str("\n\n");
        output.push_str(&checks.to_string());
    }
    output
}

pub fn display_sources(registry: &SourceRegistry, labels: &[String]) {
    println!("{}", render_sources(registry, labels));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::SystemClock;
    use crate::core::config::ProvidersConfig;
    use crate::providers::PriceSource;
    use crate::store::KeyValueStore;
    use std::sync::Arc;

    #[test]
    fn test_render_label_checks() {
        let store = KeyValueStore::in_memory(Arc::new(SystemClock));
        let registry =
            SourceRegistry::new(PriceSource::all(&ProvidersConfig::default(), &store).unwrap());

        let rendered = render_sources(
            &registry,
            &["Mis Cedears".to_string(), "Bonos".to_string()],
        );
        assert!(rendered.contains("cedears"));
        assert!(rendered.contains("crypto"));
        assert!(rendered.contains("OK"));
        assert!(rendered.contains("FAILED"));
    }
}
