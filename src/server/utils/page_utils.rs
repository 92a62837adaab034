/// the whole page is a black viewport with the player iframe stretched over it
pub fn render_player_page(title: &str, player_url: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8">
  <meta name="viewport" content="width=device-width, initial-scale=1.0">
  <title>{title}</title>
  <style>
    body {{
      margin: 0;
      padding: 0;
      display: flex;
      justify-content: center;
      align-items: center;
      height: 100vh;
      background-color: #000;
    }}
    iframe {{
      width: 100%;
      height: 100vh;
      border: none;
    }}
  </style>
</head>
<body>
  <iframe src="{src}" allowfullscreen></iframe>
</body>
</html>
"#,
        title = escape_html(title),
        src = escape_html(player_url),
    )
}

// titles come straight from tmdb, they never get to inject markup
pub fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}
