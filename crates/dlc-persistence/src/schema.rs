//! Esquema Diesel (declarado manualmente). Reemplazable con `diesel
//! print-schema`.
//!
//! Tablas:
//! - `dlc_request_headers`: header autoritativo por correlation id, con los
//!   campos de las cuatro rutas de acceso secundarias indexados.
//! - `dlc_request_stages`: registros de etapa (1..N por header); `snapshot`
//!   guarda el registro completo como JSONB.

diesel::table! {
    dlc_request_headers (correlation_id) {
        correlation_id -> Text,
        subscription_id -> Text,
        site -> Text,
        meter_serial -> Text,
        override_value -> Text,
        service -> Text,
        current_stage -> Text,
        stage_count -> Integer,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        request_start -> Nullable<Timestamptz>,
        request_end -> Nullable<Timestamptz>,
        group_id -> Nullable<Text>,
        original_start -> Nullable<Timestamptz>,
        policy_id -> Nullable<BigInt>,
        policy_name -> Nullable<Text>,
        head_end -> Nullable<Text>,
        extended_by -> Nullable<Text>,
        extends -> Nullable<Text>,
    }
}

diesel::table! {
    dlc_request_stages (correlation_id, stage_number) {
        correlation_id -> Text,
        stage_number -> Integer,
        stage_name -> Text,
        ts -> Timestamptz,
        message -> Nullable<Text>,
        snapshot -> Jsonb,
    }
}

diesel::allow_tables_to_appear_in_same_query!(dlc_request_headers, dlc_request_stages,);
