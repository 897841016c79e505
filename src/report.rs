use std::fmt::Write;

use crate::models::{CourseUnitNode, DateWindow, OrganisationNode, SummaryData};

fn question_means(summary: &SummaryData) -> String {
    if summary.result.is_empty() {
        return "no answers".to_string();
    }
    summary
        .result
        .iter()
        .map(|(question_id, result)| format!("Q{question_id} {:.2}", result.mean))
        .collect::<Vec<_>>()
        .join(", ")
}

fn summary_line(summary: &SummaryData) -> String {
    format!(
        "{} feedbacks from {} students ({:.1}%), {}",
        summary.feedback_count,
        summary.student_count,
        summary.feedback_response_percentage,
        question_means(summary)
    )
}

fn course_unit_label(course_unit: &CourseUnitNode) -> String {
    let mut label = format!("{} {}", course_unit.course_code, course_unit.name);
    if course_unit.partial {
        label.push_str(" (partial)");
    }
    if course_unit.degraded {
        label.push_str(" (unavailable)");
    }
    label
}

pub fn build_report(tree: &OrganisationNode, window: DateWindow) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Feedback Summary: {} {}", tree.code, tree.name);
    let _ = writeln!(
        output,
        "Generated for {} to {}",
        window.start_date, window.end_date
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Overall");
    let _ = writeln!(output, "- {}", summary_line(&tree.summary));
    if tree.summary.hidden_count > 0 {
        let _ = writeln!(
            output,
            "- {} feedbacks hidden below the minimum response count",
            tree.summary.hidden_count
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Organisations");

    if tree.child_organisations.is_empty() {
        let _ = writeln!(output, "No child organisations.");
    } else {
        for child in tree.child_organisations.iter() {
            let _ = writeln!(
                output,
                "- {} {}: {}",
                child.code,
                child.name,
                summary_line(&child.summary)
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Course Units");

    if tree.course_units.is_empty() {
        let _ = writeln!(output, "No course units in this window.");
    } else {
        for course_unit in tree.course_units.iter() {
            let _ = writeln!(
                output,
                "- {}: {}",
                course_unit_label(course_unit),
                summary_line(&course_unit.summary)
            );
        }
    }

    output
}
