use std::path::Path;

fn main() {
    // SQLx 0.8 keeps one query-*.json file per checked query under .sqlx/. When that
    // cache is present we can compile against it without a live database connection.
    let sqlx_dir = Path::new(".sqlx");
    let has_query_cache = sqlx_dir.is_dir()
        && sqlx_dir
            .read_dir()
            .map(|mut entries| {
                entries.any(|e| {
                    e.ok()
                        .map(|e| e.file_name().to_string_lossy().starts_with("query-"))
                        .unwrap_or(false)
                })
            })
            .unwrap_or(false);

    if has_query_cache {
        println!("cargo:rustc-env=SQLX_OFFLINE=true");
    }

    println!("cargo:rerun-if-changed=.env");
    println!("cargo:rerun-if-changed=.sqlx/");
}
