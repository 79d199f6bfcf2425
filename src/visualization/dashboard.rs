use std::collections::BTreeMap;

use crate::analysis::ModelMetrics;
use crate::model::TrainingOutcome;
use crate::service::{AnalysisReport, DiagnosisClass};

pub fn print_training_outcome(outcome: &TrainingOutcome) {
    println!("=== Training Results ({} model) ===", outcome.slot);
    println!("Samples: {}", outcome.samples);
    println!("Classes: {:?}", outcome.classes);
    println!("Trained at: {}", outcome.model.trained_at().to_rfc3339());
    println!();
    print_metrics(&outcome.metrics);
}

pub fn print_metrics(metrics: &ModelMetrics) {
    println!("Accuracy: {:.4}", metrics.accuracy);
    println!();
    println!("| Class | Precision | Recall | F1 | Support |");
    println!("|-------|-----------|--------|----|---------|");
    for (label, class) in &metrics.per_class_metrics {
        println!(
            "| {} ({}) | {:.4} | {:.4} | {:.4} | {} |",
            label,
            DiagnosisClass::from_label(*label),
            class.precision,
            class.recall,
            class.f1,
            metrics.support(*label)
        );
    }

    println!();
    println!("Confusion matrix (rows = actual, columns = predicted):");
    for row in &metrics.confusion_matrix {
        let cells: Vec<String> = row.iter().map(|c| format!("{:>5}", c)).collect();
        println!("  {}", cells.join(" "));
    }
}

pub fn print_report(report: &AnalysisReport) {
    println!("=== Analysis ===");
    println!("Predicted class: {} ({})", report.label, report.class);
    println!("Details: {}", report.info.details);
    println!("Diagnosis: {}", report.info.diagnosis);
    println!("Treatment: {}", report.info.treatment);
    println!(
        "Model accuracy: {:.2}  Precision: {:.2}  Recall: {:.2}",
        report.accuracy, report.precision, report.recall
    );
}

pub fn print_patch_votes(votes: &BTreeMap<i32, usize>) {
    let total: usize = votes.values().sum();
    println!("| Class | Patches | Share |");
    println!("|-------|---------|-------|");
    for (label, count) in votes {
        let share = if total > 0 { *count as f64 / total as f64 } else { 0.0 };
        println!(
            "| {} ({}) | {} | {:.1}% |",
            label,
            DiagnosisClass::from_label(*label),
            count,
            share * 100.0
        );
    }
}
