// Declaración Diesel de `analysis_results` (mantener alineada con migrations/).

diesel::table! {
    analysis_results (id) {
        id -> Uuid,
        dataset_id -> Int8,
        image_id -> Int8,
        operation_kind -> Text,
        operation_key -> Text,
        parameters -> Jsonb,
        params_hash -> Text,
        status -> Text,
        stage -> Nullable<Text>,
        result_summary -> Nullable<Jsonb>,
        artifact_refs -> Jsonb,
        error_message -> Nullable<Text>,
        created_at -> Timestamptz,
        started_at -> Nullable<Timestamptz>,
        completed_at -> Nullable<Timestamptz>,
    }
}
