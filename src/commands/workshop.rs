use vpk_manager_core::models::workshop::{
    WorkshopFileDetails, WorkshopItemDetail, WorkshopListResult,
};

pub fn render_file_details(d: &WorkshopFileDetails) -> String {
    let mut out = format!("{} ({})\n", d.title, d.published_file_id);
    out.push_str(&format!("  file: {}\n", d.filename));
    if d.parsed_file_size() > 0 {
        out.push_str(&format!("  size: {} bytes\n", d.parsed_file_size()));
    }
    out.push_str(&format!("  url:  {}", d.file_url));
    out
}

pub fn render_list(list: &WorkshopListResult) -> String {
    let mut out = String::new();
    for item in &list.items {
        let tags: Vec<&str> = item.tags.iter().map(|t| t.tag.as_str()).collect();
        out.push_str(&format!(
            "{:<12} {:<50} {:>8} subs",
            item.published_file_id, item.title, item.subscriptions
        ));
        if !tags.is_empty() {
            out.push_str(&format!("  [{}]", tags.join(", ")));
        }
        out.push('\n');
    }
    out.push_str(&format!("{} of {} items", list.items.len(), list.total));
    out
}

pub fn render_detail(item: &WorkshopItemDetail) -> String {
    let mut out = format!("{} ({})\n", item.title, item.published_file_id);
    out.push_str(&format!(
        "  {} bytes, {} subscriptions, {} favorites, {} views\n",
        item.file_size, item.subscriptions, item.favorited, item.views
    ));
    if let Some(updated) = chrono::DateTime::from_timestamp(item.time_updated as i64, 0) {
        if item.time_updated > 0 {
            out.push_str(&format!("  updated {}\n", updated.format("%Y-%m-%d")));
        }
    }
    if !item.description.is_empty() {
        out.push_str(&format!("\n{}\n", item.description.trim()));
    }
    out.trim_end().to_string()
}
