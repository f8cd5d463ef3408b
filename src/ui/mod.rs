pub mod icons;
pub mod output;
pub mod table;
pub mod theme;

pub use icons::Icons;
pub use output::{dim, error, header, info, muted, success, summary_row, warn};
pub use table::{rows_table, settings_table, TableBuilder};
pub use theme::{stderr_theme, theme, Theme};
