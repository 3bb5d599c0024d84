//! Standalone HTML report with metric cards and an SVG timing histogram

use crate::eval::Metrics;

const BINS: usize = 20;
const WIDTH: usize = 900;
const HEIGHT: usize = 260;
const PAD_LEFT: usize = 50;
const PAD_BOTTOM: usize = 30;

fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn fmt3(value: f64) -> String {
    format!("{:.3}", value)
}

fn fmt_opt3(value: Option<f64>) -> String {
    value.map(fmt3).unwrap_or_else(|| "N/A".to_string())
}

fn card(title: &str, value: &str, tooltip: &str) -> String {
    format!(
        concat!(
            "<div class=\"card\" title=\"{}\">",
            "<div class=\"card-title\">{}</div>",
            "<div class=\"card-value\">{}</div>",
            "</div>"
        ),
        html_escape(tooltip),
        html_escape(title),
        html_escape(value),
    )
}

/// Percentage of gold positives missed (FN rate), when any gold positives exist
fn fn_rate_pos_percent(metrics: &Metrics) -> Option<f64> {
    let positives = metrics.tp + metrics.fn_count;
    if positives > 0 {
        Some(metrics.fn_count as f64 / positives as f64 * 100.0)
    } else {
        None
    }
}

/// Percentage of gold negatives flagged as tasks (FP rate), when any exist
fn fp_rate_neg_percent(metrics: &Metrics) -> Option<f64> {
    let negatives = metrics.fp + metrics.tn;
    if negatives > 0 {
        Some(metrics.fp as f64 / negatives as f64 * 100.0)
    } else {
        None
    }
}

/// Render the per-row extract-time histogram as inline SVG rects, plus a
/// dashed line at the average
fn histogram_svg(durations_ms: &[f64], avg_ms: f64) -> String {
    let plot_w = WIDTH - PAD_LEFT - 20;
    let plot_h = HEIGHT - PAD_BOTTOM - 20;

    let (dmin, dmax) = if durations_ms.is_empty() {
        (0.0, 1.0)
    } else {
        let dmin = durations_ms.iter().cloned().fold(f64::INFINITY, f64::min);
        let dmax = durations_ms.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        // Widen degenerate ranges so the single bin stays visible
        if dmax > dmin {
            (dmin, dmax)
        } else {
            (dmin, dmin + 1.0)
        }
    };

    let bin_w = (dmax - dmin) / BINS as f64;
    let mut counts = [0usize; BINS];
    for &v in durations_ms {
        let idx = (((v - dmin) / bin_w) as usize).min(BINS - 1);
        counts[idx] += 1;
    }
    let max_count = counts.iter().copied().max().unwrap_or(1).max(1);

    let mut parts = Vec::new();

    if !durations_ms.is_empty() {
        let avg_ratio = ((avg_ms - dmin) / (dmax - dmin)).clamp(0.0, 1.0);
        let avg_x = PAD_LEFT + (avg_ratio * plot_w as f64) as usize;
        parts.push(format!(
            "<line x1=\"{x}\" y1=\"10\" x2=\"{x}\" y2=\"{y2}\" stroke=\"#EF4444\" stroke-width=\"2\" stroke-dasharray=\"4,3\" />",
            x = avg_x,
            y2 = 10 + plot_h,
        ));
    }

    for (i, &c) in counts.iter().enumerate() {
        if c == 0 {
            continue;
        }
        let x = PAD_LEFT + i * (plot_w / BINS);
        let bar_w = plot_w / BINS - 2;
        let h = (c as f64 / max_count as f64 * plot_h as f64) as usize;
        let y = 10 + (plot_h - h);
        parts.push(format!(
            "<rect x=\"{}\" y=\"{}\" width=\"{}\" height=\"{}\" fill=\"#4F46E5\" opacity=\"0.8\" />",
            x, y, bar_w, h
        ));
    }

    parts.push(format!(
        "<text x=\"{}\" y=\"{}\" class=\"axis\">{:.1} ms</text>",
        PAD_LEFT,
        HEIGHT - 6,
        dmin
    ));
    parts.push(format!(
        "<text x=\"{}\" y=\"{}\" class=\"axis\" text-anchor=\"end\">{:.1} ms</text>",
        WIDTH - 6,
        HEIGHT - 6,
        dmax
    ));

    parts.join("\n        ")
}

/// Build a standalone HTML dashboard for one evaluation run.
///
/// Precision/recall cards use the evaluator's standard definitions
/// (tp/(tp+fp), tp/(tp+fn)); the FN/FP rate cards are separate presentation
/// extras over gold positives/negatives.
pub fn build_html_report(
    dataset_name: &str,
    metrics: &Metrics,
    durations_ms: &[f64],
    avg_ms: f64,
) -> String {
    let fn_rate = fn_rate_pos_percent(metrics);
    let fp_rate = fp_rate_neg_percent(metrics);

    let cards: String = [
        card(
            "Dataset",
            dataset_name,
            "Name of the dataset file used for evaluation",
        ),
        card(
            "Samples",
            &metrics.count.to_string(),
            "Total number of rows evaluated (regardless of label availability)",
        ),
        card(
            "Precision",
            &fmt3(metrics.precision),
            "TP / (TP + FP): proportion of predicted tasks that are actual tasks",
        ),
        card(
            "Recall",
            &fmt3(metrics.recall),
            "TP / (TP + FN): proportion of actual tasks that were predicted",
        ),
        card(
            "F1",
            &fmt3(metrics.f1),
            "Harmonic mean of precision and recall: 2 * P * R / (P + R)",
        ),
        card(
            "Avg task F1",
            &fmt_opt3(metrics.avg_task_f1),
            "Average token-set F1 between predicted task text and gold_task over rows where gold_task is provided",
        ),
        card(
            "FN rate when gold=1",
            &fn_rate
                .map(|r| format!("{:.2}%", r))
                .unwrap_or_else(|| "N/A".to_string()),
            "Among actual tasks (gold=1), percentage predicted as non-task",
        ),
        card(
            "FP rate when gold=0",
            &fp_rate
                .map(|r| format!("{:.2}%", r))
                .unwrap_or_else(|| "N/A".to_string()),
            "Among actual non-tasks (gold=0), percentage predicted as task",
        ),
        card(
            "Avg extract time",
            &format!("{:.2} ms", avg_ms),
            "Average model-call plus decode time per row in milliseconds",
        ),
    ]
    .join("");

    let confusion_cards: String = [
        card(
            "True Positives",
            &metrics.tp.to_string(),
            "Predicted is_task=true and label=1",
        ),
        card(
            "False Positives",
            &metrics.fp.to_string(),
            "Predicted is_task=true but label=0",
        ),
        card(
            "False Negatives",
            &metrics.fn_count.to_string(),
            "Predicted is_task=false but label=1",
        ),
        card(
            "True Negatives",
            &metrics.tn.to_string(),
            "Predicted is_task=false and label=0",
        ),
    ]
    .join("");

    let histogram = histogram_svg(durations_ms, avg_ms);
    let title = html_escape(dataset_name);

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8" />
  <meta name="viewport" content="width=device-width, initial-scale=1.0" />
  <title>Evaluation Report - {title}</title>
  <style>
    :root {{
      --bg: #0f172a;
      --card: #1f2937;
      --text: #e5e7eb;
      --subtext: #9ca3af;
    }}
    body {{
      margin: 0; padding: 0;
      font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, Helvetica, Arial, sans-serif;
      background: linear-gradient(180deg, #0b1020, #0f172a);
      color: var(--text);
    }}
    .container {{ max-width: 1100px; margin: 0 auto; padding: 24px; }}
    .header {{ display: flex; align-items: baseline; justify-content: space-between; margin-bottom: 16px; }}
    .title {{ font-size: 28px; font-weight: 700; }}
    .subtitle {{ color: var(--subtext); font-size: 14px; }}
    .grid {{ display: grid; grid-template-columns: repeat(auto-fill, minmax(220px, 1fr)); gap: 12px; margin: 16px 0 20px; }}
    .card {{ background: linear-gradient(180deg, #1f2937, #111827); border: 1px solid rgba(255,255,255,0.06); border-radius: 12px; padding: 14px; }}
    .card-title {{ font-size: 12px; text-transform: uppercase; letter-spacing: .08em; color: var(--subtext); margin-bottom: 6px; }}
    .card-value {{ font-size: 22px; font-weight: 700; }}
    .panel {{ background: linear-gradient(180deg, #111827, #0b1220); border: 1px solid rgba(255,255,255,0.06); border-radius: 14px; padding: 16px; margin-top: 14px; }}
    .panel-title {{ font-size: 16px; font-weight: 600; margin-bottom: 10px; }}
    .axis {{ fill: var(--subtext); font-size: 11px; }}
  </style>
</head>
<body>
  <div class="container">
    <div class="header">
      <div class="title">Task Extraction Evaluation</div>
      <div class="subtitle">Dataset: {title}</div>
    </div>

    <div class="grid">
      {cards}
    </div>

    <div class="panel">
      <div class="panel-title">Extract time distribution (ms)</div>
      <svg width="{width}" height="{height}" role="img" aria-label="Histogram of extract times">
        {histogram}
      </svg>
    </div>

    <div class="panel">
      <div class="panel-title">Confusion summary</div>
      <div class="grid">
        {confusion_cards}
      </div>
    </div>
  </div>
</body>
</html>
"#,
        title = title,
        cards = cards,
        width = WIDTH,
        height = HEIGHT,
        histogram = histogram,
        confusion_cards = confusion_cards,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{GoldRow, Prediction};
    use crate::eval::EvalAccumulator;

    fn sample_metrics() -> Metrics {
        let mut acc = EvalAccumulator::default();
        let yes = Prediction {
            is_task: true,
            confidence: 0.9,
            task: "buy milk".to_string(),
        };
        let no = Prediction::default();
        let row = |label: &str, task: Option<&str>| GoldRow {
            text: String::new(),
            label: Some(label.to_string()),
            gold_task: task.map(str::to_string),
        };
        acc.fold(&yes, &row("1", Some("buy milk")));
        acc.fold(&yes, &row("0", None));
        acc.fold(&no, &row("1", None));
        acc.fold(&no, &row("0", None));
        acc.finalize()
    }

    #[test]
    fn test_report_contains_dataset_and_counts() {
        let html = build_html_report("messages.csv", &sample_metrics(), &[1.0, 2.0, 3.0], 2.0);
        assert!(html.contains("messages.csv"));
        assert!(html.contains("True Positives"));
        assert!(html.contains("<svg"));
        assert!(html.contains("0.500"));
    }

    #[test]
    fn test_report_escapes_dataset_name() {
        let html = build_html_report("<x>&\"y\".csv", &sample_metrics(), &[], 0.0);
        assert!(html.contains("&lt;x&gt;&amp;&quot;y&quot;.csv"));
        assert!(!html.contains("<x>"));
    }

    #[test]
    fn test_report_na_without_overlap_samples() {
        let metrics = EvalAccumulator::default().finalize();
        let html = build_html_report("empty.csv", &metrics, &[], 0.0);
        assert!(html.contains("N/A"));
    }

    #[test]
    fn test_rates_over_gold_partitions() {
        let metrics = sample_metrics();
        assert_eq!(fn_rate_pos_percent(&metrics), Some(50.0));
        assert_eq!(fp_rate_neg_percent(&metrics), Some(50.0));

        let empty = EvalAccumulator::default().finalize();
        assert_eq!(fn_rate_pos_percent(&empty), None);
        assert_eq!(fp_rate_neg_percent(&empty), None);
    }

    #[test]
    fn test_histogram_degenerate_inputs() {
        // No durations and all-equal durations must still render
        let svg = histogram_svg(&[], 0.0);
        assert!(svg.contains("ms</text>"));
        let svg = histogram_svg(&[5.0, 5.0, 5.0], 5.0);
        assert!(svg.contains("<rect"));
    }
}
