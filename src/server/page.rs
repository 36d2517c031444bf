//! Viewer page served at `/`.

use crate::ledger::{render_table_html, LedgerRow};

const INDEX_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <title>Inference Viewer</title>
  <style>
    body { font-family: sans-serif; background: #111; color: #eee; margin: 1.5rem; }
    .layout { display: flex; gap: 1.5rem; align-items: flex-start; flex-wrap: wrap; }
    img { max-width: 960px; width: 100%; border: 1px solid #444; }
    table.dataframe { border-collapse: collapse; font-size: 0.9rem; }
    table.dataframe th, table.dataframe td { padding: 0.25rem 0.6rem; border: 1px solid #444; }
  </style>
</head>
<body>
  <h1>Live Inference</h1>
  <div class="layout">
    <img src="/stream_frames" alt="live stream">
    <div id="table">@@TABLE@@</div>
  </div>
  <script>
    async function refreshTable() {
      try {
        const res = await fetch('/table_data', { cache: 'no-store' });
        if (res.ok) {
          document.getElementById('table').innerHTML = await res.text();
        }
      } catch (err) {
        console.warn('table refresh failed', err);
      }
    }
    setInterval(refreshTable, @@REFRESH_MS@@);
  </script>
</body>
</html>
"#;

/// Render the page with the current table snapshot inlined.
pub(crate) fn render_index(rows: &[LedgerRow], refresh_ms: u64) -> String {
    INDEX_TEMPLATE
        .replace("@@TABLE@@", &render_table_html(rows))
        .replace("@@REFRESH_MS@@", &refresh_ms.max(100).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_embeds_stream_table_and_refresh() {
        let rows = vec![LedgerRow::new("2024-05-01 12:00:00", "dent", 0.9)];
        let html = render_index(&rows, 1000);
        assert!(html.contains(r#"<img src="/stream_frames""#));
        assert!(html.contains("<td>dent</td>"));
        assert!(html.contains("setInterval(refreshTable, 1000)"));
        assert!(!html.contains("@@"));
    }
}
