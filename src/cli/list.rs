use super::ui;
use crate::core::config::AppConfig;
use comfy_table::Cell;

pub fn render(config: &AppConfig) -> String {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Dashboard"),
        ui::header_cell("Benchmark"),
        ui::header_cell("Tickers"),
        ui::header_cell("YTD Base"),
        ui::header_cell("Window"),
        ui::header_cell("Coin"),
    ]);
    for dashboard in &config.dashboards {
        table.add_row(vec![
            Cell::new(&dashboard.name),
            Cell::new(&dashboard.benchmark),
            Cell::new(dashboard.tickers.join(", ")),
            Cell::new(dashboard.ytd_base_date),
            Cell::new(dashboard.correlation_window),
            Cell::new(dashboard.coin_type.map_or("-", |c| c.as_str())),
        ]);
    }
    table.to_string()
}

pub fn run(config: &AppConfig) {
    println!("{}", render(config));
}
