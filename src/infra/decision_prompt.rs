use crate::app::ports::{
    DecisionProvider, DuplicateDecision, DuplicateReview, FieldDecision, FieldReview,
};
use crate::error::{EnrichError, Result};
use async_trait::async_trait;
use dialoguer::{theme::ColorfulTheme, Select};

/// Asks the operator on the terminal.
pub struct TerminalDecisions;

#[async_trait]
impl DecisionProvider for TerminalDecisions {
    async fn decide(&self, review: &DuplicateReview) -> Result<DuplicateDecision> {
        let choice = select(
            describe(review),
            "Keep this company?",
            &["Keep as a separate company", "Drop as duplicate"],
        )
        .await?;

        Ok(if choice == 0 {
            DuplicateDecision::Keep
        } else {
            DuplicateDecision::Drop
        })
    }

    async fn review_field(&self, review: &FieldReview) -> Result<FieldDecision> {
        let choice = select(
            describe_field(review),
            "Which value should be kept?",
            &["Keep current value", "Use validated value"],
        )
        .await?;

        Ok(if choice == 0 {
            FieldDecision::KeepCurrent
        } else {
            FieldDecision::TakeProposed
        })
    }
}

async fn select(summary: String, prompt: &'static str, items: &'static [&'static str]) -> Result<usize> {
    // dialoguer blocks on stdin
    tokio::task::spawn_blocking(move || {
        eprintln!("{}", summary);
        Select::with_theme(&ColorfulTheme::default())
            .with_prompt(prompt)
            .items(items)
            .default(0)
            .interact()
    })
    .await
    .map_err(|e| EnrichError::Io(std::io::Error::other(e.to_string())))?
    .map_err(|e| EnrichError::Io(std::io::Error::other(e.to_string())))
}

fn describe_field(review: &FieldReview) -> String {
    format!(
        "\n🔍 Validation for {}: {}\n   current:   {}\n   validated: {} (confidence {:.2})",
        review.identity.display_name(),
        review.field,
        review.current,
        review.proposed,
        review.confidence
    )
}

fn describe(review: &DuplicateReview) -> String {
    let mut lines = vec![format!(
        "\n⚠️  Possible duplicate: {} ({})",
        review.identity.display_name(),
        review.identity.company_url
    )];
    for m in &review.matches {
        lines.push(format!(
            "   matches {} ({}) by {:?}",
            m.other.display_name(),
            m.other.company_url,
            m.basis
        ));
    }
    if let Ok(data) = serde_json::to_string_pretty(&review.record.data) {
        lines.push(format!("   merged data: {}", data));
    }
    lines.join("\n")
}
