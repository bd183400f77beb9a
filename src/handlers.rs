use actix_multipart::Multipart;
use actix_web::http::header;
use actix_web::{web, Error, HttpResponse, Result};
use futures_util::StreamExt;

use crate::certificate::{CertificateClient, VerifyOutcome};
use crate::error::AppError;
use crate::models::{
    HealthResponse, MintRequest, PredictionResponse, VerifyQuery, VerifyResponse, VerifyStatus,
};
use crate::state::AppContext;

/// Uploads beyond this are refused before decoding.
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

pub fn configure(cfg: &mut web::ServiceConfig) {
    // Extractor failures get the same JSON error body as handler failures.
    cfg.app_data(web::QueryConfig::default().error_handler(|err, _req| {
        AppError::InvalidIdentifier(format!("missing or malformed query: {err}")).into()
    }))
    .app_data(web::JsonConfig::default().error_handler(|err, _req| {
        AppError::UnknownPrediction(format!("malformed mint request: {err}")).into()
    }))
    .service(web::resource("/predict").route(web::post().to(predict)))
    .service(web::resource("/mint").route(web::post().to(mint)))
    .service(web::resource("/verify").route(web::get().to(verify_query)))
    .service(web::resource("/verify/{id}").route(web::get().to(verify_path)))
    .service(web::resource("/qr/{id}").route(web::get().to(qr)))
    .service(web::resource("/health").route(web::get().to(health)));
}

/// Read the first file field of the upload into memory.
async fn read_upload(mut payload: Multipart) -> Result<Vec<u8>, Error> {
    while let Some(item) = payload.next().await {
        let mut field = item?;
        let mut data = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk?;
            if data.len() + chunk.len() > MAX_UPLOAD_BYTES {
                return Err(AppError::UploadTooLarge {
                    limit: MAX_UPLOAD_BYTES,
                }
                .into());
            }
            data.extend_from_slice(&chunk);
        }
        if !data.is_empty() {
            return Ok(data);
        }
    }
    Err(AppError::ImageDecode("no image in upload".into()).into())
}

pub async fn predict(ctx: web::Data<AppContext>, payload: Multipart) -> Result<HttpResponse, Error> {
    let adapter = ctx.require_adapter()?;
    let labels = adapter.manifest().labels.clone();
    let bytes = read_upload(payload).await?;

    let prediction = web::block(move || adapter.predict_bytes(&bytes)).await??;

    let confidence = prediction.confidence();
    let band = ctx.policy.classify(confidence);
    let prediction_id = ctx.predictions.insert(confidence);
    tracing::info!(%prediction_id, confidence, band = band.describe(), "image classified");

    Ok(HttpResponse::Ok().json(PredictionResponse {
        prediction_id: prediction_id.to_string(),
        confidence,
        complement: prediction.complement(),
        band,
        mint_enabled: band.mint_enabled(),
        labels,
    }))
}

pub async fn mint(
    ctx: web::Data<AppContext>,
    body: web::Json<MintRequest>,
) -> Result<HttpResponse, Error> {
    let confidence = ctx.predictions.get(&body.prediction_id)?;
    let _permit = ctx.mint_guard.try_acquire()?;

    let minted = ctx.certificates.mint(confidence).await?;

    Ok(HttpResponse::Ok()
        .content_type("application/pdf")
        .insert_header((
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"certificate-{}.pdf\"", minted.id),
        ))
        .insert_header(("X-Certificate-Id", minted.id.to_string()))
        .body(minted.pdf))
}

async fn verify_with(client: &CertificateClient, input: &str) -> Result<HttpResponse, Error> {
    let response = match client.verify(input).await? {
        VerifyOutcome::Verified { id, metadata, qr } => HttpResponse::Ok().json(VerifyResponse {
            status: VerifyStatus::Verified,
            cert_id: id.to_string(),
            metadata: Some(metadata),
            qr_available: qr.is_some(),
        }),
        VerifyOutcome::NotFound { id } => HttpResponse::NotFound().json(VerifyResponse {
            status: VerifyStatus::NotFound,
            cert_id: id.to_string(),
            metadata: None,
            qr_available: false,
        }),
    };
    Ok(response)
}

pub async fn verify_path(
    ctx: web::Data<AppContext>,
    path: web::Path<String>,
) -> Result<HttpResponse, Error> {
    verify_with(&ctx.certificates, &path.into_inner()).await
}

/// QR deep link: `/verify?verify=<id>`.
pub async fn verify_query(
    ctx: web::Data<AppContext>,
    query: web::Query<VerifyQuery>,
) -> Result<HttpResponse, Error> {
    verify_with(&ctx.certificates, &query.verify).await
}

pub async fn qr(ctx: web::Data<AppContext>, path: web::Path<String>) -> Result<HttpResponse, Error> {
    let id = ctx.certificates.rules().parse(&path.into_inner())?;
    let image = ctx.certificates.fetch_qr_image(&id).await?;
    Ok(HttpResponse::Ok()
        .content_type(image.content_type)
        .body(image.bytes))
}

pub async fn health(ctx: web::Data<AppContext>) -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok".to_string(),
        model_loaded: ctx.adapter.is_some(),
        tracked_predictions: ctx.predictions.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    use actix_web::http::StatusCode;
    use actix_web::{test, App};

    use crate::certificate::fake_service::{client_for, spawn_fake, FakeService};
    use crate::config::IdIssuance;
    use crate::inference::tests::{adapter, png_bytes};
    use crate::inference::InferenceAdapter;
    use crate::policy::DecisionPolicy;
    use crate::state::{MintGuard, PredictionStore};

    const BOUNDARY: &str = "authcheck-test-boundary";

    fn context(adapter: Option<InferenceAdapter>, certificates: CertificateClient) -> AppContext {
        AppContext {
            adapter: adapter.map(Arc::new),
            load_error: Some("model.onnx missing".into()),
            policy: DecisionPolicy::default(),
            certificates,
            predictions: PredictionStore::new(8),
            mint_guard: MintGuard::default(),
            model_path: "model.onnx".into(),
        }
    }

    fn multipart_body(bytes: &[u8]) -> Vec<u8> {
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"photo.png\"\r\nContent-Type: image/png\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn upload(bytes: &[u8]) -> test::TestRequest {
        test::TestRequest::post()
            .uri("/predict")
            .insert_header((
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            ))
            .set_payload(multipart_body(bytes))
    }

    #[actix_rt::test]
    async fn predict_reports_band_and_stores_confidence() {
        let ctx = web::Data::new(context(
            Some(adapter(vec![0.1, 0.9], &["replica", "authentic"])),
            client_for("http://127.0.0.1:1", IdIssuance::Server),
        ));
        let app = test::init_service(App::new().app_data(ctx.clone()).configure(configure)).await;

        let resp: PredictionResponse =
            test::call_and_read_body_json(&app, upload(&png_bytes()).to_request()).await;
        assert!((resp.confidence - 90.0).abs() < 1e-3);
        assert!((resp.complement - 10.0).abs() < 1e-3);
        assert_eq!(resp.band, crate::policy::Band::Authentic);
        assert!(resp.mint_enabled);
        assert_eq!(resp.labels, vec!["replica", "authentic"]);
        assert!((ctx.predictions.get(&resp.prediction_id).unwrap() - 90.0).abs() < 1e-3);
    }

    #[actix_rt::test]
    async fn predict_without_model_is_unavailable() {
        let ctx = web::Data::new(context(
            None,
            client_for("http://127.0.0.1:1", IdIssuance::Server),
        ));
        let app = test::init_service(App::new().app_data(ctx).configure(configure)).await;

        let resp = test::call_service(&app, upload(&png_bytes()).to_request()).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "model_load");
    }

    #[actix_rt::test]
    async fn predict_rejects_non_image_upload() {
        let ctx = web::Data::new(context(
            Some(adapter(vec![0.9], &["authentic"])),
            client_for("http://127.0.0.1:1", IdIssuance::Server),
        ));
        let app = test::init_service(App::new().app_data(ctx).configure(configure)).await;

        let resp = test::call_service(&app, upload(b"plain text").to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_rt::test]
    async fn oversized_upload_is_payload_too_large() {
        let ctx = web::Data::new(context(
            Some(adapter(vec![0.9], &["authentic"])),
            client_for("http://127.0.0.1:1", IdIssuance::Server),
        ));
        let app = test::init_service(App::new().app_data(ctx).configure(configure)).await;

        let oversized = vec![0u8; MAX_UPLOAD_BYTES + 1];
        let resp = test::call_service(&app, upload(&oversized).to_request()).await;
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "upload_too_large");
    }

    #[actix_rt::test]
    async fn mint_returns_pdf_download() {
        let (base, svc, handle) = spawn_fake(FakeService::healthy()).await;
        let ctx = web::Data::new(context(None, client_for(&base, IdIssuance::Server)));
        let prediction_id = ctx.predictions.insert(93.0).to_string();
        let app = test::init_service(App::new().app_data(ctx.clone()).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/mint")
            .set_json(MintRequest { prediction_id })
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get(header::CONTENT_DISPOSITION).unwrap(),
            "attachment; filename=\"certificate-OF-SERVER123.pdf\""
        );
        assert_eq!(resp.headers().get("X-Certificate-Id").unwrap(), "OF-SERVER123");
        let body = test::read_body(resp).await;
        assert_eq!(&body[..], b"%PDF-1.4 fake");
        assert_eq!(svc.pdfs.load(Ordering::SeqCst), 1);
        assert!(ctx.mint_guard.try_acquire().is_ok());
        handle.stop(true).await;
    }

    #[actix_rt::test]
    async fn mint_refuses_uncertain_prediction() {
        let (base, svc, handle) = spawn_fake(FakeService::healthy()).await;
        let ctx = web::Data::new(context(None, client_for(&base, IdIssuance::Server)));
        let prediction_id = ctx.predictions.insert(70.0).to_string();
        let app = test::init_service(App::new().app_data(ctx).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/mint")
            .set_json(MintRequest { prediction_id })
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert_eq!(svc.posts.load(Ordering::SeqCst), 0);
        handle.stop(true).await;
    }

    #[actix_rt::test]
    async fn mint_is_refused_while_another_is_running() {
        let ctx = web::Data::new(context(
            None,
            client_for("http://127.0.0.1:1", IdIssuance::Server),
        ));
        let prediction_id = ctx.predictions.insert(95.0).to_string();
        let _held = ctx.mint_guard.try_acquire().unwrap();
        let app = test::init_service(App::new().app_data(ctx.clone()).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/mint")
            .set_json(MintRequest { prediction_id })
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[actix_rt::test]
    async fn mint_with_unknown_prediction_is_bad_request() {
        let ctx = web::Data::new(context(
            None,
            client_for("http://127.0.0.1:1", IdIssuance::Server),
        ));
        let app = test::init_service(App::new().app_data(ctx).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/mint")
            .set_json(MintRequest {
                prediction_id: uuid::Uuid::new_v4().to_string(),
            })
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_rt::test]
    async fn malformed_mint_body_gets_json_error() {
        let ctx = web::Data::new(context(
            None,
            client_for("http://127.0.0.1:1", IdIssuance::Server),
        ));
        let app = test::init_service(App::new().app_data(ctx).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/mint")
            .insert_header((header::CONTENT_TYPE, "application/json"))
            .set_payload("{\"predictionId\": ")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "unknown_prediction");
        assert!(body["message"].is_string());
    }

    #[actix_rt::test]
    async fn deep_link_without_identifier_gets_json_error() {
        let ctx = web::Data::new(context(
            None,
            client_for("http://127.0.0.1:1", IdIssuance::Server),
        ));
        let app = test::init_service(App::new().app_data(ctx).configure(configure)).await;

        let req = test::TestRequest::get().uri("/verify").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "invalid_identifier");
    }

    #[actix_rt::test]
    async fn verify_deep_link_reaches_service() {
        let (base, svc, handle) = spawn_fake(FakeService::healthy()).await;
        let ctx = web::Data::new(context(None, client_for(&base, IdIssuance::Server)));
        let app = test::init_service(App::new().app_data(ctx).configure(configure)).await;

        let req = test::TestRequest::get()
            .uri("/verify?verify=%20of-abcde1234%20")
            .to_request();
        let resp: VerifyResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp.status, VerifyStatus::Verified);
        assert_eq!(resp.cert_id, "OF-ABCDE1234");
        assert!(resp.qr_available);
        assert_eq!(svc.lookups.load(Ordering::SeqCst), 1);
        handle.stop(true).await;
    }

    #[actix_rt::test]
    async fn verify_not_found_is_404_without_qr() {
        let (base, svc, handle) = spawn_fake(FakeService {
            lookup_status: 404,
            ..FakeService::healthy()
        })
        .await;
        let ctx = web::Data::new(context(None, client_for(&base, IdIssuance::Server)));
        let app = test::init_service(App::new().app_data(ctx).configure(configure)).await;

        let req = test::TestRequest::get().uri("/verify/OF-AAAAA1111").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body: VerifyResponse = test::read_body_json(resp).await;
        assert_eq!(body.status, VerifyStatus::NotFound);
        assert_eq!(svc.qrs.load(Ordering::SeqCst), 0);
        handle.stop(true).await;
    }

    #[actix_rt::test]
    async fn verify_rejects_malformed_identifier_locally() {
        let ctx = web::Data::new(context(
            None,
            client_for("http://127.0.0.1:1", IdIssuance::Server),
        ));
        let app = test::init_service(App::new().app_data(ctx).configure(configure)).await;

        let req = test::TestRequest::get().uri("/verify/XX-123").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "invalid_identifier");
    }

    #[actix_rt::test]
    async fn qr_is_proxied() {
        let (base, _svc, handle) = spawn_fake(FakeService::healthy()).await;
        let ctx = web::Data::new(context(None, client_for(&base, IdIssuance::Server)));
        let app = test::init_service(App::new().app_data(ctx).configure(configure)).await;

        let req = test::TestRequest::get().uri("/qr/OF-ABCDE1234").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get(header::CONTENT_TYPE).unwrap(), "image/png");
        handle.stop(true).await;
    }

    #[actix_rt::test]
    async fn health_reports_model_state() {
        let ctx = web::Data::new(context(
            None,
            client_for("http://127.0.0.1:1", IdIssuance::Server),
        ));
        let app = test::init_service(App::new().app_data(ctx).configure(configure)).await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let resp: HealthResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp.status, "ok");
        assert!(!resp.model_loaded);
    }
}
