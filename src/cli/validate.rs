use super::ui;
use crate::ValidateArgs;
use crate::validation::{ValidationCache, ValidationOutcome};
use anyhow::{Result, bail};

impl ValidationOutcome {
    pub fn display(&self, code: &str) -> String {
        match (&self.holding, self.is_valid) {
            (Some(holding), true) => format!(
                "{} {} ({}) can be priced, quantity {}",
                ui::style_text("Valid:", ui::StyleType::TotalValue),
                holding.name,
                holding.code,
                holding.quantity
            ),
            _ => format!(
                "{} {} cannot be priced by its source",
                ui::style_text("Invalid:", ui::StyleType::Error),
                code
            ),
        }
    }
}

pub async fn validate(validation: &ValidationCache, args: &ValidateArgs) -> Result<()> {
    let outcome = match (&args.group_id, &args.category_id) {
        (Some(group_id), _) => {
            validation
                .validate_in_group(group_id, &args.name, &args.code, args.quantity)
                .await?
        }
        (None, Some(category_id)) => {
            validation
                .validate_with_category_id(
                    category_id,
                    args.group_name.as_deref(),
                    &args.name,
                    &args.code,
                    args.quantity,
                )
                .await?
        }
        (None, None) => bail!("Either --group-id or --category-id is required"),
    };
    println!("{}", outcome.display(&args.code));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::HoldingDraft;

    #[test]
    fn test_display_outcome() {
        let valid = ValidationOutcome {
            is_valid: true,
            holding: Some(HoldingDraft {
                name: "Bitcoin".into(),
                code: "BTC".into(),
                quantity: 1.0,
            }),
        };
        assert!(valid.display("BTC").contains("Bitcoin (BTC) can be priced"));

        let invalid = ValidationOutcome {
            is_valid: false,
            holding: None,
        };
        assert!(invalid.display("XYZ").contains("XYZ cannot be priced"));
    }
}
