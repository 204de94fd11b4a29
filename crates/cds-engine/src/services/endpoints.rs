//! Row and query service URL builders

use uuid::Uuid;

fn dtable_url(base_url: &str, dtable_uuid: Uuid, action: &str) -> String {
    format!(
        "{}/api/v1/dtables/{}/{}/",
        base_url.trim_end_matches('/'),
        dtable_uuid,
        action
    )
}

pub fn metadata_url(base_url: &str, dtable_uuid: Uuid) -> String {
    dtable_url(base_url, dtable_uuid, "metadata")
}

pub fn tables_url(base_url: &str, dtable_uuid: Uuid) -> String {
    dtable_url(base_url, dtable_uuid, "tables")
}

pub fn batch_append_columns_url(base_url: &str, dtable_uuid: Uuid) -> String {
    dtable_url(base_url, dtable_uuid, "batch-append-columns")
}

pub fn batch_update_columns_url(base_url: &str, dtable_uuid: Uuid) -> String {
    dtable_url(base_url, dtable_uuid, "batch-update-columns")
}

pub fn batch_append_rows_url(base_url: &str, dtable_uuid: Uuid) -> String {
    dtable_url(base_url, dtable_uuid, "batch-append-rows")
}

pub fn batch_update_rows_url(base_url: &str, dtable_uuid: Uuid) -> String {
    dtable_url(base_url, dtable_uuid, "batch-update-rows")
}

pub fn batch_delete_rows_url(base_url: &str, dtable_uuid: Uuid) -> String {
    dtable_url(base_url, dtable_uuid, "batch-delete-rows")
}

pub fn query_url(base_url: &str, dtable_uuid: Uuid) -> String {
    format!(
        "{}/api/v1/query/{}/",
        base_url.trim_end_matches('/'),
        dtable_uuid
    )
}
