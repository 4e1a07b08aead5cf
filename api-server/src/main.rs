#[rocket::launch]
fn rocket() -> _ {
    posts_api::init_logger();
    log::info!("starting posts API server");
    posts_api::rocket()
}
