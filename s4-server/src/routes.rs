use crate::response::{ApiError, ApiResult};
use rocket::serde::json::Json;
use rocket::{get, post, routes, Route, State};
use s4_core::error::S4Error;
use s4_core::jobs::JobId;
use s4_core::listing::ListEntry;
use s4_core::map::{MapArgs, MapFromNArgs, MapOutcome, MapToNArgs};
use s4_core::node::Node;
use s4_core::put::PendingPipelines;
use serde::Serialize;
use std::sync::Arc;

pub fn routes() -> Vec<Route> {
    routes![
        prepare_put,
        confirm_put,
        prepare_get,
        confirm_get,
        list,
        list_buckets,
        delete,
        eval,
        map,
        map_to_n,
        map_from_n,
        health,
    ]
}

fn parse_job_id(uuid: &str) -> Result<JobId, S4Error> {
    JobId::from_hex(uuid).ok_or_else(|| S4Error::malformed(format!("malformed job id '{uuid}'"), "http"))
}

#[post("/prepare_put?<key>")]
async fn prepare_put(node: &State<Arc<Node>>, pipelines: &State<Arc<PendingPipelines>>, key: String) -> ApiResult<Json<(String, u16)>> {
    let result = s4_core::put::prepare_put(node, pipelines, &key).await?;
    Ok(Json((result.job_id.as_hex(), result.port)))
}

#[post("/confirm_put?<uuid>&<checksum>")]
async fn confirm_put(node: &State<Arc<Node>>, pipelines: &State<Arc<PendingPipelines>>, uuid: String, checksum: String) -> ApiResult<()> {
    let job_id = parse_job_id(&uuid)?;
    s4_core::put::confirm_put(node, pipelines, job_id, &checksum).await?;
    Ok(())
}

#[post("/prepare_get?<key>&<port>")]
async fn prepare_get(node: &State<Arc<Node>>, pipelines: &State<Arc<PendingPipelines>>, remote: std::net::SocketAddr, key: String, port: u16) -> ApiResult<Json<String>> {
    let client_address = remote.ip().to_string();
    let job_id = s4_core::get::prepare_get(node, pipelines, &key, &client_address, port).await?;
    Ok(Json(job_id.as_hex()))
}

#[post("/confirm_get?<uuid>&<checksum>")]
async fn confirm_get(node: &State<Arc<Node>>, pipelines: &State<Arc<PendingPipelines>>, uuid: String, checksum: String) -> ApiResult<()> {
    let job_id = parse_job_id(&uuid)?;
    s4_core::get::confirm_get(node, pipelines, job_id, &checksum).await?;
    Ok(())
}

#[get("/list?<prefix>&<recursive>")]
fn list(node: &State<Arc<Node>>, prefix: String, recursive: bool) -> ApiResult<Json<Vec<ListEntry>>> {
    let entries = s4_core::listing::list(&node.data_root, &prefix, recursive).map_err(ApiError::from)?;
    Ok(Json(entries))
}

#[get("/list_buckets")]
fn list_buckets(node: &State<Arc<Node>>) -> ApiResult<Json<Vec<String>>> {
    let buckets = s4_core::listing::list_buckets(&node.data_root).map_err(ApiError::from)?;
    Ok(Json(buckets))
}

#[post("/delete?<prefix>&<recursive>")]
async fn delete(node: &State<Arc<Node>>, prefix: String, recursive: bool) -> ApiResult<()> {
    s4_core::listing::delete(node, &prefix, recursive).await?;
    Ok(())
}

#[post("/eval?<key>", data = "<cmd>")]
async fn eval(node: &State<Arc<Node>>, key: String, cmd: String) -> ApiResult<String> {
    let stdout = s4_core::eval::eval(node, &key, &cmd).await?;
    Ok(stdout)
}

#[post("/map", data = "<body>")]
async fn map(node: &State<Arc<Node>>, body: Json<MapArgs>) -> ApiResult<Json<MapOutcome>> {
    let args = body.into_inner();
    let outcome = s4_core::map::map(node, args.args, &args.cmd).await?;
    Ok(Json(outcome))
}

#[post("/map_to_n", data = "<body>")]
async fn map_to_n(node: &State<Arc<Node>>, body: Json<MapToNArgs>) -> ApiResult<Json<MapOutcome>> {
    let args = body.into_inner();
    let outcome = s4_core::map::map_to_n(node, args.args, &args.cmd).await?;
    Ok(Json(outcome))
}

#[post("/map_from_n?<outdir>", data = "<body>")]
async fn map_from_n(node: &State<Arc<Node>>, outdir: String, body: Json<MapFromNArgs>) -> ApiResult<Json<MapOutcome>> {
    let args = body.into_inner();
    let outcome = s4_core::map::map_from_n(node, &outdir, args.args, &args.cmd).await?;
    Ok(Json(outcome))
}

#[derive(Serialize)]
struct PoolOccupancy {
    live: usize,
    capacity: usize,
}

#[derive(Serialize)]
struct HealthBody {
    io_send: PoolOccupancy,
    io_recv: PoolOccupancy,
    compute: PoolOccupancy,
    misc: PoolOccupancy,
    single_writer: PoolOccupancy,
}

#[get("/health")]
fn health(node: &State<Arc<Node>>) -> Json<HealthBody> {
    let occ = |live: usize, capacity: usize| PoolOccupancy { live, capacity };
    Json(HealthBody {
        io_send: occ(node.pools.io_send.live(), node.pools.io_send.capacity()),
        io_recv: occ(node.pools.io_recv.live(), node.pools.io_recv.capacity()),
        compute: occ(node.pools.compute.live(), node.pools.compute.capacity()),
        misc: occ(node.pools.misc.live(), node.pools.misc.capacity()),
        single_writer: occ(node.pools.single_writer.live(), node.pools.single_writer.capacity()),
    })
}
