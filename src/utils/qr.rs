// 二维码生成工具
// 为链上订单生成收款二维码

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, ImageFormat, Luma};
use qrcode::QrCode;
use std::io::Cursor;

/// 生成支付二维码
///
/// # Arguments
/// * `payment_uri` - 支付链接 (如 tron:T...?amount=5)
///
/// # Returns
/// * Base64编码的PNG图片数据
pub fn generate_payment_qr_code(payment_uri: &str) -> Result<String> {
    let qr_code = QrCode::new(payment_uri.as_bytes())
        .context("Failed to create QR code")?;

    let image = qr_code.render::<Luma<u8>>().min_dimensions(200, 200).build();

    let mut png_data = Vec::new();
    DynamicImage::ImageLuma8(image)
        .write_to(&mut Cursor::new(&mut png_data), ImageFormat::Png)
        .context("Failed to encode PNG")?;

    Ok(format!("data:image/png;base64,{}", STANDARD.encode(&png_data)))
}
