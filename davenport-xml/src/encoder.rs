use futures::future::{BoxFuture, FutureExt};
use quick_xml::events::{BytesText, Event};
use quick_xml::Error as QError;

use super::types::*;
use super::values::{format_http_date, PropValue};
use super::xml::{IWrite, QName, QWrite, Writer};

impl QWrite for Href {
    async fn qwrite(&self, xml: &mut Writer<impl IWrite>) -> Result<(), QError> {
        let start = xml.create_dav_element("href");
        let end = start.to_end().into_owned();

        xml.q.write_event_async(Event::Start(start.clone())).await?;
        xml.q
            .write_event_async(Event::Text(BytesText::new(&self.0)))
            .await?;
        xml.q.write_event_async(Event::End(end)).await
    }
}

impl QWrite for Status {
    async fn qwrite(&self, xml: &mut Writer<impl IWrite>) -> Result<(), QError> {
        let start = xml.create_dav_element("status");
        let end = start.to_end().into_owned();
        let line = format!(
            "HTTP/1.1 {} {}",
            self.0.as_u16(),
            self.0.canonical_reason().unwrap_or("Unknown")
        );

        xml.q.write_event_async(Event::Start(start.clone())).await?;
        xml.q
            .write_event_async(Event::Text(BytesText::new(&line)))
            .await?;
        xml.q.write_event_async(Event::End(end)).await
    }
}

/// PROPFIND RESPONSE, PROPPATCH RESPONSE, COPY RESPONSE, MOVE RESPONSE,
/// MKCOL RESPONSE
impl QWrite for Multistatus {
    async fn qwrite(&self, xml: &mut Writer<impl IWrite>) -> Result<(), QError> {
        let start = xml.create_dav_element("multistatus");
        let end = start.to_end().into_owned();

        xml.q.write_event_async(Event::Start(start.clone())).await?;
        for response in self.responses.iter() {
            response.qwrite(xml).await?;
        }
        xml.q.write_event_async(Event::End(end)).await
    }
}

impl QWrite for MsResponse {
    async fn qwrite(&self, xml: &mut Writer<impl IWrite>) -> Result<(), QError> {
        let start = xml.create_dav_element("response");
        let end = start.to_end().into_owned();

        xml.q.write_event_async(Event::Start(start.clone())).await?;
        self.href.qwrite(xml).await?;
        match &self.body {
            MsBody::Status(status) => status.qwrite(xml).await?,
            MsBody::PropStat(propstats) => {
                for propstat in propstats {
                    propstat.qwrite(xml).await?;
                }
            }
        }
        xml.q.write_event_async(Event::End(end)).await
    }
}

impl QWrite for PropStat {
    async fn qwrite(&self, xml: &mut Writer<impl IWrite>) -> Result<(), QError> {
        let start = xml.create_dav_element("propstat");
        let end = start.to_end().into_owned();

        xml.q.write_event_async(Event::Start(start.clone())).await?;

        let prop_start = xml.create_dav_element("prop");
        let prop_end = prop_start.to_end().into_owned();
        xml.q
            .write_event_async(Event::Start(prop_start.clone()))
            .await?;
        for (name, value) in &self.props {
            write_prop_entry(name, value, xml).await?;
        }
        xml.q.write_event_async(Event::End(prop_end)).await?;

        self.status.qwrite(xml).await?;
        xml.q.write_event_async(Event::End(end)).await
    }
}

/// One property inside `<d:prop>`: the element named after the property,
/// wrapping the value's content. `None` values serialize as empty
/// elements (404 buckets, propname answers).
async fn write_prop_entry(
    name: &QName,
    value: &Option<PropValue>,
    xml: &mut Writer<impl IWrite>,
) -> Result<(), QError> {
    match value {
        // A captured foreign element already carries its own name
        Some(PropValue::Xml(el)) if &el.name == name => el.qwrite(xml).await,
        Some(value) if !value.is_empty_content() => {
            let start = xml.create_element(name);
            let end = start.to_end().into_owned();
            xml.q.write_event_async(Event::Start(start.clone())).await?;
            write_value_content(value, xml).await?;
            xml.q.write_event_async(Event::End(end)).await
        }
        _ => {
            let start = xml.create_element(name);
            xml.q.write_event_async(Event::Empty(start)).await
        }
    }
}

fn write_value_content<'a, W: IWrite>(
    value: &'a PropValue,
    xml: &'a mut Writer<W>,
) -> BoxFuture<'a, Result<(), QError>> {
    async move {
        match value {
            PropValue::Text(text) => {
                xml.q
                    .write_event_async(Event::Text(BytesText::new(text)))
                    .await
            }
            PropValue::Int(number) => {
                xml.q
                    .write_event_async(Event::Text(BytesText::new(&number.to_string())))
                    .await
            }
            PropValue::Date(date) => {
                xml.q
                    .write_event_async(Event::Text(BytesText::new(&format_http_date(date))))
                    .await
            }
            PropValue::Href(href) => Href(href.clone()).qwrite(xml).await,
            PropValue::ResourceType(names) => {
                for name in names {
                    let start = xml.create_element(name);
                    xml.q.write_event_async(Event::Empty(start)).await?;
                }
                Ok(())
            }
            PropValue::SupportedReportSet(reports) => {
                for report in reports {
                    let outer = xml.create_dav_element("supported-report");
                    let outer_end = outer.to_end().into_owned();
                    xml.q.write_event_async(Event::Start(outer.clone())).await?;

                    let inner = xml.create_dav_element("report");
                    let inner_end = inner.to_end().into_owned();
                    xml.q.write_event_async(Event::Start(inner.clone())).await?;
                    let leaf = xml.create_element(report);
                    xml.q.write_event_async(Event::Empty(leaf)).await?;
                    xml.q.write_event_async(Event::End(inner_end)).await?;

                    xml.q.write_event_async(Event::End(outer_end)).await?;
                }
                Ok(())
            }
            PropValue::Response(response) => response.qwrite(xml).await,
            PropValue::Xml(element) => element.qwrite(xml).await,
        }
    }
    .boxed()
}

/// Error response
impl QWrite for ErrorBody {
    async fn qwrite(&self, xml: &mut Writer<impl IWrite>) -> Result<(), QError> {
        let start = xml.create_dav_element("error");
        let end = start.to_end().into_owned();

        xml.q.write_event_async(Event::Start(start.clone())).await?;

        if let Some(condition) = &self.condition {
            let cond = xml.create_element(condition);
            xml.q.write_event_async(Event::Empty(cond)).await?;
        }

        write_vendor_text(xml, "exception", &self.exception).await?;
        write_vendor_text(xml, "message", &self.message).await?;
        if let Some(file) = &self.file {
            write_vendor_text(xml, "file", file).await?;
        }
        if let Some(line) = self.line {
            write_vendor_text(xml, "line", &line.to_string()).await?;
        }
        write_vendor_text(xml, "davenport-version", &self.version).await?;

        xml.q.write_event_async(Event::End(end)).await
    }
}

async fn write_vendor_text(
    xml: &mut Writer<impl IWrite>,
    name: &str,
    text: &str,
) -> Result<(), QError> {
    let start = xml.create_vendor_element(name);
    let end = start.to_end().into_owned();
    xml.q.write_event_async(Event::Start(start.clone())).await?;
    xml.q
        .write_event_async(Event::Text(BytesText::new(text)))
        .await?;
    xml.q.write_event_async(Event::End(end)).await
}
